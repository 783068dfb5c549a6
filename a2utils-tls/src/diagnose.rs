//! Why would certbot fail for this vhost?
//!
//! 🩺 Checks the things an HTTP-01 validation depends on: a document root
//! that exists, names that resolve to this host, and a challenge file that
//! is actually served. For https vhosts the current certificate is checked
//! too.

use crate::cert::{CertError, CertInfo};
use crate::challenge::{ChallengeDeployer, ChallengeFile, WebrootDeployer};
use crate::probe::{self, ProbeError};
use a2utils_config::VirtualHost;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

/// One thing that would make issuance or renewal fail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum Problem {
    NoDocumentRoot { vhost: String },
    DocumentRootMissing { path: PathBuf },
    DnsFailed { name: String, error: String },
    DnsNotLocal { name: String, addresses: Vec<IpAddr> },
    ChallengeFailed { name: String, url: String, error: String },
    CertMissing { path: PathBuf },
    CertUnreadable { path: PathBuf, error: String },
    CertExpiring { path: PathBuf, days_left: i64 },
    CertNamesMismatch { path: PathBuf, missing: Vec<String> },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::NoDocumentRoot { vhost } => write!(f, "{}: no DocumentRoot", vhost),
            Problem::DocumentRootMissing { path } => {
                write!(f, "DocumentRoot {} does not exist", path.display())
            }
            Problem::DnsFailed { name, error } => write!(f, "{}: DNS lookup failed: {}", name, error),
            Problem::DnsNotLocal { name, addresses } => {
                let list: Vec<String> = addresses.iter().map(IpAddr::to_string).collect();
                write!(f, "{} resolves to {}, not to this host", name, list.join(", "))
            }
            Problem::ChallengeFailed { name, url, error } => {
                write!(f, "{}: challenge {} not served: {}", name, url, error)
            }
            Problem::CertMissing { path } => write!(f, "certificate {} is missing", path.display()),
            Problem::CertUnreadable { path, error } => {
                write!(f, "certificate {} is unreadable: {}", path.display(), error)
            }
            Problem::CertExpiring { path, days_left } => {
                write!(f, "certificate {} expires in {} days", path.display(), days_left)
            }
            Problem::CertNamesMismatch { path, missing } => write!(
                f,
                "certificate {} does not cover {}",
                path.display(),
                missing.join(", ")
            ),
        }
    }
}

/// 🩺 Runs the checks
#[derive(Debug, Clone)]
pub struct Diagnoser {
    client: reqwest::Client,
    /// Empty disables the "resolves to this host" check
    local_addresses: Vec<IpAddr>,
    renew_days: i64,
    check_challenge: bool,
}

impl Diagnoser {
    pub fn new(client: reqwest::Client, local_addresses: Vec<IpAddr>) -> Self {
        Self {
            client,
            local_addresses,
            renew_days: 20,
            check_challenge: true,
        }
    }

    pub fn renew_days(mut self, days: i64) -> Self {
        self.renew_days = days;
        self
    }

    /// Skip the challenge round trip (no file is written)
    pub fn without_challenge(mut self) -> Self {
        self.check_challenge = false;
        self
    }

    /// Document root, DNS and challenge checks for the names of `vhost`
    pub async fn check_vhost(&self, vhost: &VirtualHost) -> Vec<Problem> {
        let Some(root) = &vhost.document_root else {
            return vec![Problem::NoDocumentRoot {
                vhost: vhost.label(),
            }];
        };
        if !root.is_dir() {
            return vec![Problem::DocumentRootMissing { path: root.clone() }];
        }

        // Wildcards cannot be validated over http
        let names: Vec<String> = vhost
            .names()
            .into_iter()
            .filter(|n| !n.starts_with("*."))
            .collect();

        let mut problems = Vec::new();
        let mut reachable = Vec::new();
        let lookups = join_all(names.iter().map(|n| probe::resolve(n))).await;
        for (name, lookup) in names.iter().zip(lookups) {
            match self.dns_problem(name, lookup) {
                Some(problem) => problems.push(problem),
                None => reachable.push(name.clone()),
            }
        }

        if self.check_challenge && !reachable.is_empty() {
            problems.extend(self.challenge_problems(root.clone(), &reachable).await);
        }
        problems
    }

    fn dns_problem(&self, name: &str, lookup: Result<Vec<IpAddr>, ProbeError>) -> Option<Problem> {
        match lookup {
            Err(e) => Some(Problem::DnsFailed {
                name: name.to_string(),
                error: e.to_string(),
            }),
            Ok(addresses) => {
                let local = self.local_addresses.is_empty()
                    || addresses.iter().any(|a| self.local_addresses.contains(a));
                (!local).then(|| Problem::DnsNotLocal {
                    name: name.to_string(),
                    addresses,
                })
            }
        }
    }

    async fn challenge_problems(&self, root: PathBuf, names: &[String]) -> Vec<Problem> {
        let deployer = WebrootDeployer::new(root);
        let challenge = ChallengeFile::random();

        if let Err(e) = deployer.deploy(&challenge).await {
            // Same failure for every name; report once
            let _ = deployer.cleanup(&challenge).await;
            return vec![Problem::ChallengeFailed {
                name: names.join(" "),
                url: deployer.path_for(&challenge).display().to_string(),
                error: e.to_string(),
            }];
        }

        let client = &self.client;
        let expected = challenge.content.as_str();
        let fetches = names.iter().map(|name| {
            let url = challenge.url(name);
            async move {
                let result = probe::fetch_challenge(client, &url, expected).await;
                (name, url, result)
            }
        });
        let results = join_all(fetches).await;

        if let Err(e) = deployer.cleanup(&challenge).await {
            tracing::warn!("🧹 Cleanup failed: {}", e);
        }

        results
            .into_iter()
            .filter_map(|(name, url, result)| {
                result.err().map(|e| Problem::ChallengeFailed {
                    name: name.clone(),
                    url,
                    error: e.to_string(),
                })
            })
            .collect()
    }

    /// Certificate checks for an https vhost
    pub fn check_certificate(&self, vhost: &VirtualHost) -> Vec<Problem> {
        let Some(path) = &vhost.certificate else {
            return Vec::new();
        };
        let info = match CertInfo::from_pem_file(path) {
            Ok(info) => info,
            Err(CertError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return vec![Problem::CertMissing { path: path.clone() }];
            }
            Err(e) => {
                return vec![Problem::CertUnreadable {
                    path: path.clone(),
                    error: e.to_string(),
                }];
            }
        };

        let mut problems = Vec::new();
        let days_left = info.days_left();
        if days_left < self.renew_days {
            problems.push(Problem::CertExpiring {
                path: path.clone(),
                days_left,
            });
        }
        let missing = info.missing_names(&vhost.names());
        if !missing.is_empty() {
            problems.push(Problem::CertNamesMismatch {
                path: path.clone(),
                missing,
            });
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a2utils_config::ConfigTree;
    use std::time::Duration;

    fn vhost(source: &str) -> VirtualHost {
        ConfigTree::from_source("/etc/apache2/sites-enabled/t.conf", source)
            .unwrap()
            .vhosts()
            .remove(0)
    }

    fn diagnoser(local: &[&str]) -> Diagnoser {
        let client = probe::http_client(Duration::from_secs(2)).unwrap();
        Diagnoser::new(client, local.iter().map(|a| a.parse().unwrap()).collect())
    }

    #[tokio::test]
    async fn test_no_document_root() {
        let v = vhost("<VirtualHost *:80>\nServerName a.test\n</VirtualHost>\n");
        let problems = diagnoser(&[]).check_vhost(&v).await;
        assert_eq!(problems, vec![Problem::NoDocumentRoot { vhost: "a.test:80".to_string() }]);
    }

    #[tokio::test]
    async fn test_missing_document_root() {
        let v = vhost("<VirtualHost *:80>\nServerName a.test\nDocumentRoot /nonexistent/a2utils\n</VirtualHost>\n");
        let problems = diagnoser(&[]).check_vhost(&v).await;
        assert!(matches!(&problems[..], [Problem::DocumentRootMissing { .. }]));
    }

    #[tokio::test]
    async fn test_dns_not_local() {
        let dir = tempfile::tempdir().unwrap();
        let v = vhost(&format!(
            "<VirtualHost *:80>\nServerName 127.0.0.1\nDocumentRoot {}\n</VirtualHost>\n",
            dir.path().display()
        ));
        let problems = diagnoser(&["192.0.2.1"]).without_challenge().check_vhost(&v).await;
        assert_eq!(problems.len(), 1);
        assert!(matches!(&problems[0], Problem::DnsNotLocal { name, .. } if name == "127.0.0.1"));
        assert_eq!(problems[0].to_string(), "127.0.0.1 resolves to 127.0.0.1, not to this host");
    }

    #[tokio::test]
    async fn test_challenge_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        // Port 1 refuses connections
        let d = diagnoser(&["127.0.0.1"]);
        let problems = d.challenge_problems(dir.path().to_path_buf(), &["127.0.0.1:1".to_string()]).await;
        assert!(matches!(&problems[..], [Problem::ChallengeFailed { .. }]));
        assert!(!dir.path().join(".well-known").exists());
    }

    #[test]
    fn test_certificate_missing() {
        let v = vhost(
            "<VirtualHost *:443>\nServerName a.test\nSSLEngine on\nSSLCertificateFile /nonexistent/fullchain.pem\n</VirtualHost>\n",
        );
        let problems = diagnoser(&[]).check_certificate(&v);
        assert_eq!(
            problems,
            vec![Problem::CertMissing { path: "/nonexistent/fullchain.pem".into() }]
        );
    }

    #[test]
    fn test_certificate_checks() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["a.test".to_string()]).unwrap();
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2021, 1, 1);
        let key = rcgen::KeyPair::generate().unwrap();
        let pem = params.self_signed(&key).unwrap().pem();
        let path = dir.path().join("fullchain.pem");
        std::fs::write(&path, pem).unwrap();

        let v = vhost(&format!(
            "<VirtualHost *:443>\nServerName a.test\nServerAlias b.test\nSSLCertificateFile {}\n</VirtualHost>\n",
            path.display()
        ));
        let problems = diagnoser(&[]).check_certificate(&v);
        assert_eq!(problems.len(), 2);
        assert!(matches!(&problems[0], Problem::CertExpiring { days_left, .. } if *days_left < 0));
        assert_eq!(
            problems[1],
            Problem::CertNamesMismatch {
                path,
                missing: vec!["b.test".to_string()]
            }
        );
    }

    #[test]
    fn test_problem_json() {
        let problem = Problem::DnsFailed {
            name: "a.test".to_string(),
            error: "timeout".to_string(),
        };
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["problem"], "dns_failed");
        assert_eq!(json["name"], "a.test");
    }
}
