//! Remote hosts over OpenSSH
//!
//! 🔑 Thin wrapper around the `ssh`/`scp` binaries. Everything runs in batch
//! mode, so keys must already be set up.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// SSH errors
#[derive(Debug, Error)]
pub enum SshError {
    #[error("⚠️ Invalid ssh target '{0}'")]
    InvalidTarget(String),

    #[error("💥 Cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("❌ {target}: '{command}' failed (exit code {code:?}): {stderr}")]
    Failed {
        target: String,
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// `[user@]host[:port]` plus connection options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity: Option<PathBuf>,
    /// Extra `-o` style arguments passed verbatim
    pub options: Vec<String>,
    ssh: Vec<String>,
    scp: Vec<String>,
}

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity: None,
            options: Vec::new(),
            ssh: vec!["ssh".to_string()],
            scp: vec!["scp".to_string()],
        }
    }

    pub fn with_identity(mut self, identity: impl Into<PathBuf>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = String>) -> Self {
        self.options.extend(options);
        self
    }

    /// Replace the `ssh` and `scp` commands (first element is the program)
    pub fn with_programs(mut self, ssh: Vec<String>, scp: Vec<String>) -> Self {
        self.ssh = ssh;
        self.scp = scp;
        self
    }

    /// `user@host` or `host`
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(port) = self.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.extend(self.options.iter().cloned());
        args
    }

    /// Full argv for running `command` remotely
    pub fn ssh_argv(&self, command: &str) -> Vec<String> {
        let mut argv = self.ssh.clone();
        argv.extend(self.common_args("-p"));
        argv.push(self.destination());
        argv.push(command.to_string());
        argv
    }

    /// Full argv for copying a local file to `remote`
    pub fn scp_argv(&self, local: &Path, remote: &str) -> Vec<String> {
        let mut argv = self.scp.clone();
        argv.extend(self.common_args("-P"));
        argv.push(local.display().to_string());
        argv.push(format!("{}:{}", self.destination(), shell_quote(remote)));
        argv
    }

    /// 🔑 Run a shell command on the remote host, returning stdout
    pub async fn run(&self, command: &str) -> Result<Vec<u8>, SshError> {
        self.exec(self.ssh_argv(command), command, None).await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        self.run(&format!("cat {}", shell_quote(path))).await
    }

    /// Write `data` to a remote file through `cat >`
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SshError> {
        let command = format!("cat > {}", shell_quote(path));
        self.exec(self.ssh_argv(&command), &command, Some(data)).await?;
        Ok(())
    }

    /// 📦 Copy a local file with scp
    pub async fn copy_to(&self, local: &Path, remote: &str) -> Result<(), SshError> {
        tracing::debug!("📦 {} -> {}:{}", local.display(), self.destination(), remote);
        let argv = self.scp_argv(local, remote);
        let label = format!("scp {}", local.display());
        self.exec(argv, &label, None).await?;
        Ok(())
    }

    async fn exec(&self, argv: Vec<String>, label: &str, stdin: Option<&[u8]>) -> Result<Vec<u8>, SshError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SshError::InvalidTarget(self.destination()))?;
        tracing::debug!("🔑 {} {}", program, args.join(" "));

        let spawn_error = |source| SshError::Spawn {
            program: program.clone(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(data).await.map_err(spawn_error)?;
            pipe.shutdown().await.map_err(spawn_error)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        if !output.status.success() {
            return Err(SshError::Failed {
                target: self.destination(),
                command: label.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

impl FromStr for SshTarget {
    type Err = SshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SshError::InvalidTarget(s.to_string());

        let (user, rest) = match s.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return Err(invalid()),
            None => (None, s),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, Some(port.parse::<u16>().map_err(|_| invalid())?)),
            None => (rest, None),
        };

        if host.is_empty() || host.contains(['/', ' ', '@', ':']) {
            return Err(invalid());
        }

        let mut target = SshTarget::new(host);
        target.user = user;
        target.port = port;
        Ok(target)
    }
}

/// Quote for a POSIX shell unless the word is obviously safe
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let t: SshTarget = "root@web1.example.com:2222".parse().unwrap();
        assert_eq!(t.user.as_deref(), Some("root"));
        assert_eq!(t.host, "web1.example.com");
        assert_eq!(t.port, Some(2222));
        assert_eq!(t.destination(), "root@web1.example.com");

        let t: SshTarget = "web1".parse().unwrap();
        assert_eq!(t.user, None);
        assert_eq!(t.port, None);

        assert!("@web1".parse::<SshTarget>().is_err());
        assert!("web1:ssh".parse::<SshTarget>().is_err());
        assert!("".parse::<SshTarget>().is_err());
    }

    #[test]
    fn test_argv() {
        let t: SshTarget = "deploy@web1:2222".parse().unwrap();
        let t = t.with_identity("/root/.ssh/id_ed25519");
        assert_eq!(
            t.ssh_argv("uptime"),
            vec!["ssh", "-o", "BatchMode=yes", "-p", "2222", "-i", "/root/.ssh/id_ed25519", "deploy@web1", "uptime"]
        );
        assert_eq!(
            t.scp_argv(Path::new("/tmp/a b.pem"), "/etc/ssl/a b.pem"),
            vec![
                "scp", "-o", "BatchMode=yes", "-P", "2222", "-i", "/root/.ssh/id_ed25519",
                "/tmp/a b.pem", "deploy@web1:'/etc/ssl/a b.pem'"
            ]
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/var/www/site"), "/var/www/site");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    /// Target whose "ssh" runs the remote command with the local shell
    fn local_target(dir: &Path) -> SshTarget {
        let script = dir.join("fake-ssh");
        std::fs::write(&script, "for a; do last=$a; done\nexec sh -c \"$last\"\n").unwrap();
        SshTarget::new("localhost").with_programs(
            vec!["sh".to_string(), script.display().to_string()],
            vec!["false".to_string()],
        )
    }

    #[tokio::test]
    async fn test_run_and_files_through_fake_ssh() {
        let dir = tempfile::tempdir().unwrap();
        let target = local_target(dir.path());

        assert_eq!(target.run("echo hello").await.unwrap(), b"hello\n");

        let remote = dir.path().join("with space.txt").display().to_string();
        target.write_file(&remote, b"token-content").await.unwrap();
        assert_eq!(std::fs::read(&remote).unwrap(), b"token-content");
        assert_eq!(target.read_file(&remote).await.unwrap(), b"token-content");
    }

    #[tokio::test]
    async fn test_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let target = local_target(dir.path());

        match target.run("echo oops >&2; exit 3").await {
            Err(SshError::Failed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(matches!(
            target.copy_to(Path::new("/etc/hostname"), "/tmp/x").await,
            Err(SshError::Failed { .. })
        ));
    }
}
