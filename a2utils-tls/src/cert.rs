//! Certificate inspection
//!
//! 📜 Reads the leaf certificate of a PEM file (fullchain files start with
//! the leaf) and answers the questions a renewal check needs.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

const DAY: i64 = 24 * 60 * 60;

/// Certificate errors
#[derive(Debug, Error)]
pub enum CertError {
    #[error("💥 Cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("⚠️ No PEM certificate in {}", .0.display())]
    Empty(PathBuf),

    #[error("⚠️ Invalid certificate in {}: {message}", .path.display())]
    Invalid { path: PathBuf, message: String },
}

/// 📜 What we know about a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub path: PathBuf,
    pub common_name: Option<String>,
    /// DNS subject alternative names, lowercase
    pub names: Vec<String>,
    pub issuer: String,
    /// Unix seconds
    pub not_before: i64,
    /// Unix seconds
    pub not_after: i64,
}

impl CertInfo {
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CertError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| CertError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(path, &data)
    }

    /// Parse the first certificate of a PEM buffer
    pub fn from_pem(path: impl Into<PathBuf>, data: &[u8]) -> Result<Self, CertError> {
        let path = path.into();
        let invalid = |message: String| CertError::Invalid {
            path: path.clone(),
            message,
        };

        let pem = Pem::iter_from_buffer(data)
            .next()
            .ok_or_else(|| CertError::Empty(path.clone()))?
            .map_err(|e| invalid(e.to_string()))?;
        if pem.label != "CERTIFICATE" {
            return Err(invalid(format!("unexpected PEM block '{}'", pem.label)));
        }
        let cert = pem.parse_x509().map_err(|e| invalid(e.to_string()))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let mut names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    names.push(dns.to_ascii_lowercase());
                }
            }
        }

        Ok(Self {
            common_name,
            names,
            issuer: cert.issuer().to_string(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            path,
        })
    }

    /// Whole days until expiry, negative once expired
    pub fn days_left(&self) -> i64 {
        self.days_left_at(now())
    }

    pub fn days_left_at(&self, now: i64) -> i64 {
        (self.not_after - now).div_euclid(DAY)
    }

    pub fn needs_renewal(&self, threshold_days: i64) -> bool {
        self.days_left() < threshold_days
    }

    /// Whether a SAN (or the CN when there are no SANs) covers `name`
    pub fn covers(&self, name: &str) -> bool {
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        if self.names.is_empty() {
            return self
                .common_name
                .as_deref()
                .is_some_and(|cn| name_matches(&cn.to_ascii_lowercase(), &name));
        }
        self.names.iter().any(|san| name_matches(san, &name))
    }

    /// Names from `names` this certificate does not cover
    pub fn missing_names<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        names.into_iter().filter(|n| !self.covers(n)).cloned().collect()
    }
}

/// `*.example.com` matches exactly one extra label
fn name_matches(pattern: &str, name: &str) -> bool {
    if pattern == name {
        return true;
    }
    pattern.strip_prefix("*.").is_some_and(|suffix| {
        name.strip_suffix(suffix)
            .and_then(|label| label.strip_suffix('.'))
            .is_some_and(|label| !label.is_empty() && !label.contains('.'))
    })
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{date_time_ymd, CertificateParams, DnType, KeyPair};

    // 2030-01-01T00:00:00Z
    const NOT_AFTER: i64 = 1_893_456_000;

    fn pem(names: &[&str], cn: &str) -> String {
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
        params.not_before = date_time_ymd(2024, 1, 1);
        params.not_after = date_time_ymd(2030, 1, 1);
        params.distinguished_name.push(DnType::CommonName, cn);
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_parse_generated_cert() {
        let text = pem(&["example.com", "*.example.com"], "example.com");
        let info = CertInfo::from_pem("fullchain.pem", text.as_bytes()).unwrap();

        assert_eq!(info.common_name.as_deref(), Some("example.com"));
        assert_eq!(info.names, vec!["example.com", "*.example.com"]);
        assert_eq!(info.not_after, NOT_AFTER);
        assert_eq!(info.not_before, 1_704_067_200);
        assert!(info.issuer.contains("example.com"));
    }

    #[test]
    fn test_days_left() {
        let info = CertInfo::from_pem("c.pem", pem(&["a.test"], "a.test").as_bytes()).unwrap();
        assert_eq!(info.days_left_at(NOT_AFTER - 10 * DAY), 10);
        assert_eq!(info.days_left_at(NOT_AFTER - 10 * DAY + 1), 9);
        assert_eq!(info.days_left_at(NOT_AFTER + 1), -1);
        assert!(!info.needs_renewal(20));
    }

    #[test]
    fn test_covers_and_missing() {
        let info = CertInfo::from_pem("c.pem", pem(&["example.com", "*.example.com"], "x").as_bytes()).unwrap();
        assert!(info.covers("EXAMPLE.com."));
        assert!(info.covers("www.example.com"));
        assert!(!info.covers("a.b.example.com"));
        assert!(!info.covers("example.org"));

        let wanted = vec!["example.com".to_string(), "example.org".to_string()];
        assert_eq!(info.missing_names(&wanted), vec!["example.org"]);
    }

    #[test]
    fn test_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");
        assert!(matches!(CertInfo::from_pem_file(&missing), Err(CertError::Io { .. })));

        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "not a certificate\n").unwrap();
        assert!(matches!(CertInfo::from_pem_file(&empty), Err(CertError::Empty(_))));

        let good = dir.path().join("cert.pem");
        std::fs::write(&good, pem(&["a.test"], "a.test")).unwrap();
        assert_eq!(CertInfo::from_pem_file(&good).unwrap().names, vec!["a.test"]);
    }
}
