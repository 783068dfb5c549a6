//! HTTP-01 challenge files
//!
//! 🧩 A challenge file is a token placed under
//! `<docroot>/.well-known/acme-challenge/`. Deployers put it there (locally
//! or over ssh) and take it away again, leaving pre-existing directories
//! alone.

use crate::ssh::{shell_quote, SshError, SshTarget};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

/// Path of the challenge directory relative to a document root
pub const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// Challenge errors
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("💥 IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("⚠️ Invalid challenge token '{0}'")]
    InvalidToken(String),

    #[error(transparent)]
    Ssh(#[from] SshError),
}

/// 🧩 Token and the content served for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeFile {
    pub token: String,
    pub content: String,
}

impl ChallengeFile {
    pub fn new(token: impl Into<String>, content: impl Into<String>) -> Result<Self, ChallengeError> {
        let token = token.into();
        let valid = !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ChallengeError::InvalidToken(token));
        }
        Ok(Self {
            token,
            content: content.into(),
        })
    }

    /// Fresh random token and content for self-checks
    pub fn random() -> Self {
        Self {
            token: uuid::Uuid::new_v4().simple().to_string(),
            content: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// `.well-known/acme-challenge/<token>`
    pub fn relative_path(&self) -> String {
        format!("{}/{}", CHALLENGE_DIR, self.token)
    }

    pub fn url(&self, host: &str) -> String {
        format!("http://{}/{}", host, self.relative_path())
    }
}

/// Places challenge files where the web server can serve them
#[async_trait]
pub trait ChallengeDeployer: Send + Sync {
    /// 🚀 Make the challenge reachable
    async fn deploy(&self, challenge: &ChallengeFile) -> Result<(), ChallengeError>;

    /// 🧹 Remove the challenge and whatever deploy created for it
    async fn cleanup(&self, challenge: &ChallengeFile) -> Result<(), ChallengeError>;
}

/// Writes challenges below a local document root
pub struct WebrootDeployer {
    webroot: PathBuf,
    /// Directories created by `deploy`, outermost first
    created: Mutex<Vec<PathBuf>>,
}

impl WebrootDeployer {
    pub fn new(webroot: impl Into<PathBuf>) -> Self {
        Self {
            webroot: webroot.into(),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn webroot(&self) -> &Path {
        &self.webroot
    }

    pub fn path_for(&self, challenge: &ChallengeFile) -> PathBuf {
        self.webroot.join(challenge.relative_path())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ChallengeError + '_ {
    move |source| ChallengeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ChallengeDeployer for WebrootDeployer {
    async fn deploy(&self, challenge: &ChallengeFile) -> Result<(), ChallengeError> {
        let mut created = self.created.lock().await;
        let mut dir = self.webroot.clone();
        for part in CHALLENGE_DIR.split('/') {
            dir.push(part);
            if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                tokio::fs::create_dir(&dir).await.map_err(io_error(&dir))?;
                created.push(dir.clone());
            }
        }

        let path = self.path_for(challenge);
        tracing::debug!("🧩 Writing {}", path.display());
        tokio::fs::write(&path, &challenge.content)
            .await
            .map_err(io_error(&path))
    }

    async fn cleanup(&self, challenge: &ChallengeFile) -> Result<(), ChallengeError> {
        let path = self.path_for(challenge);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!("🧹 Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&path)(e)),
        }

        let mut created = self.created.lock().await;
        while let Some(dir) = created.pop() {
            // Another challenge may still live there
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                tracing::debug!("Keeping {}: {}", dir.display(), e);
                created.push(dir);
                break;
            }
        }
        Ok(())
    }
}

/// Lists the directories a remote deploy created, one per line. certbot
/// runs the auth and cleanup hooks as separate processes, so this lives on
/// the remote host rather than in memory.
pub const CREATED_MARKER: &str = ".a2utils-created";

/// Writes challenges below a document root on a remote host
pub struct SshDeployer {
    target: SshTarget,
    webroot: String,
}

impl SshDeployer {
    pub fn new(target: SshTarget, webroot: impl Into<String>) -> Self {
        Self {
            target,
            webroot: webroot.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn path_for(&self, challenge: &ChallengeFile) -> String {
        format!("{}/{}", self.webroot, challenge.relative_path())
    }

    fn challenge_dir(&self) -> String {
        format!("{}/{}", self.webroot, CHALLENGE_DIR)
    }

    fn marker_path(&self) -> String {
        format!("{}/{}", self.challenge_dir(), CREATED_MARKER)
    }

    /// Directories recorded by an earlier deploy, outermost first
    async fn recorded_dirs(&self) -> Option<Vec<String>> {
        let data = self.target.read_file(&self.marker_path()).await.ok()?;
        let prefix = format!("{}/", self.webroot);
        Some(
            String::from_utf8_lossy(&data)
                .lines()
                .filter(|l| l.starts_with(&prefix))
                .map(str::to_string)
                .collect(),
        )
    }
}

#[async_trait]
impl ChallengeDeployer for SshDeployer {
    async fn deploy(&self, challenge: &ChallengeFile) -> Result<(), ChallengeError> {
        let mut created = Vec::new();
        let mut dir = self.webroot.clone();
        for part in CHALLENGE_DIR.split('/') {
            dir = format!("{}/{}", dir, part);
            let quoted = shell_quote(&dir);
            let exists = self.target.run(&format!("test -d {}", quoted)).await.is_ok();
            if !exists {
                self.target.run(&format!("mkdir {}", quoted)).await?;
                created.push(dir.clone());
            }
        }
        if !created.is_empty() {
            let record = format!("{}\n", created.join("\n"));
            self.target.write_file(&self.marker_path(), record.as_bytes()).await?;
        }

        let path = self.path_for(challenge);
        tracing::debug!("🧩 Writing {}:{}", self.target.destination(), path);
        self.target
            .write_file(&path, challenge.content.as_bytes())
            .await?;
        Ok(())
    }

    async fn cleanup(&self, challenge: &ChallengeFile) -> Result<(), ChallengeError> {
        let path = self.path_for(challenge);
        self.target
            .run(&format!("rm -f {}", shell_quote(&path)))
            .await?;

        let Some(recorded) = self.recorded_dirs().await else {
            return Ok(());
        };

        // Other tokens still pending: the last cleanup removes the directories
        let listing = self
            .target
            .run(&format!("ls -A {}", shell_quote(&self.challenge_dir())))
            .await?;
        let pending = String::from_utf8_lossy(&listing)
            .lines()
            .any(|name| !name.is_empty() && name != CREATED_MARKER);
        if pending {
            tracing::debug!("Keeping {}: other challenges pending", self.challenge_dir());
            return Ok(());
        }

        self.target
            .run(&format!("rm -f {}", shell_quote(&self.marker_path())))
            .await?;
        for dir in recorded.iter().rev() {
            if self.target.run(&format!("rmdir {}", shell_quote(dir))).await.is_err() {
                tracing::debug!("Keeping {}", dir);
                break;
            }
        }
        Ok(())
    }
}
