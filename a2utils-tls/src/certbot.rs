//! certbot invocation
//!
//! 🔐 Builds `certbot certonly` command lines and runs them. Certificates
//! end up in certbot's usual `live/<cert-name>/` layout.

use crate::ssh::shell_quote;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// certbot errors
#[derive(Debug, Error)]
pub enum CertbotError {
    #[error("⚠️ No names to request a certificate for")]
    NoNames,

    #[error("💥 Cannot run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("❌ certbot failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// How certbot proves control of the names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authenticator {
    /// `--webroot -w <dir>`
    Webroot(PathBuf),
    /// `--manual` with hook commands
    Manual { auth_hook: String, cleanup_hook: String },
}

/// 🔐 One `certbot certonly` request
#[derive(Debug, Clone)]
pub struct CertbotRequest {
    pub binary: String,
    pub names: Vec<String>,
    pub authenticator: Authenticator,
    pub email: Option<String>,
    pub staging: bool,
    pub dry_run: bool,
    pub cert_name: Option<String>,
    pub expand: bool,
}

impl CertbotRequest {
    pub fn new(names: Vec<String>, authenticator: Authenticator) -> Self {
        Self {
            binary: "certbot".to_string(),
            names,
            authenticator,
            email: None,
            staging: false,
            dry_run: false,
            cert_name: None,
            expand: true,
        }
    }

    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn staging(mut self, staging: bool) -> Self {
        self.staging = staging;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn cert_name(mut self, name: impl Into<String>) -> Self {
        self.cert_name = Some(name.into());
        self
    }

    /// certbot's lineage name: explicit, or the first requested name
    pub fn lineage(&self) -> Option<&str> {
        self.cert_name.as_deref().or(self.names.first().map(String::as_str))
    }

    pub fn argv(&self) -> Result<Vec<String>, CertbotError> {
        if self.names.is_empty() {
            return Err(CertbotError::NoNames);
        }

        let mut argv: Vec<String> = [self.binary.as_str(), "certonly", "--non-interactive", "--agree-tos"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match &self.authenticator {
            Authenticator::Webroot(dir) => {
                argv.push("--webroot".into());
                argv.push("-w".into());
                argv.push(dir.display().to_string());
            }
            Authenticator::Manual { auth_hook, cleanup_hook } => {
                argv.extend(["--manual", "--preferred-challenges", "http"].map(String::from));
                argv.push("--manual-auth-hook".into());
                argv.push(auth_hook.clone());
                argv.push("--manual-cleanup-hook".into());
                argv.push(cleanup_hook.clone());
            }
        }

        match &self.email {
            Some(email) => {
                argv.push("--email".into());
                argv.push(email.clone());
            }
            None => argv.push("--register-unsafely-without-email".into()),
        }

        if let Some(name) = &self.cert_name {
            argv.push("--cert-name".into());
            argv.push(name.clone());
        }
        if self.expand {
            argv.push("--expand".into());
        }
        if self.staging {
            argv.push("--staging".into());
        }
        if self.dry_run {
            argv.push("--dry-run".into());
        }

        for name in &self.names {
            argv.push("-d".into());
            argv.push(name.clone());
        }
        Ok(argv)
    }

    /// The command as a copy-pasteable shell line
    pub fn command_line(&self) -> Result<String, CertbotError> {
        Ok(self
            .argv()?
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// 🚀 Run certbot, returning its stdout
    pub async fn run(&self) -> Result<String, CertbotError> {
        let argv = self.argv()?;
        tracing::info!("🔐 Requesting certificate for {}", self.names.join(", "));
        tracing::debug!("{}", argv.join(" "));

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .await
            .map_err(|source| CertbotError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CertbotError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::info!("✅ certbot finished");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Files of a certbot lineage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePaths {
    pub dir: PathBuf,
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
    pub cert: PathBuf,
    pub chain: PathBuf,
}

pub fn live_paths(letsencrypt_dir: &Path, cert_name: &str) -> LivePaths {
    let dir = letsencrypt_dir.join("live").join(cert_name);
    LivePaths {
        fullchain: dir.join("fullchain.pem"),
        privkey: dir.join("privkey.pem"),
        cert: dir.join("cert.pem"),
        chain: dir.join("chain.pem"),
        dir,
    }
}

/// Whether a certificate path is managed by certbot
pub fn is_letsencrypt_path(path: &Path, letsencrypt_dir: &Path) -> bool {
    path.starts_with(letsencrypt_dir.join("live")) || path.starts_with(letsencrypt_dir.join("archive"))
}

/// Lineage name from a `.../live/<name>/fullchain.pem` path
pub fn lineage_of(path: &Path, letsencrypt_dir: &Path) -> Option<String> {
    let rest = path.strip_prefix(letsencrypt_dir.join("live")).ok()?;
    rest.components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
}
