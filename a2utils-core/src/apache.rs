//! Apache service control
//!
//! Thin wrappers around `apache2ctl -t` and the configured reload command.

use crate::config::ApacheSettings;
use crate::error::{Error, Result};
use std::process::Command;

/// Controls the running apache instance
#[derive(Debug, Clone)]
pub struct Apache {
    ctl: String,
    reload_command: Vec<String>,
}

impl Apache {
    /// Create a controller from settings
    pub fn new(settings: &ApacheSettings) -> Self {
        Self {
            ctl: settings.ctl.clone(),
            reload_command: settings.reload_command.clone(),
        }
    }

    /// Validate the configuration (`apache2ctl -t`)
    pub fn configtest(&self) -> Result<()> {
        tracing::info!("🔍 Checking apache configuration");
        run(&[self.ctl.clone(), "-t".to_string()]).map(|_| ())
    }

    /// Reload apache so that config changes take effect
    pub fn reload(&self) -> Result<()> {
        tracing::info!("🔄 Reloading apache");
        run(&self.reload_command).map(|_| ())
    }

    /// Validate then reload; nothing is reloaded when the test fails
    pub fn test_and_reload(&self) -> Result<()> {
        self.configtest()?;
        self.reload()
    }
}

/// Run a command given as argv, returning its stdout
pub fn run(argv: &[String]) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::Config("empty command".to_string()))?;

    tracing::debug!("▶️ {}", argv.join(" "));
    let output = Command::new(program).args(args).output().map_err(|e| Error::Command {
        cmd: argv.join(" "),
        code: None,
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(Error::Command {
            cmd: argv.join(" "),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_run_captures_stdout() {
        let out = run(&argv(&["sh", "-c", "echo hello"])).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_run_reports_exit_code() {
        let err = run(&argv(&["sh", "-c", "echo broken >&2; exit 3"])).unwrap_err();
        match err {
            Error::Command { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_command() {
        assert!(matches!(run(&[]), Err(Error::Config(_))));
    }

    #[test]
    fn test_failed_configtest_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("reloaded");
        let apache = Apache::new(&ApacheSettings {
            ctl: "false".to_string(),
            reload_command: argv(&["touch", marker.to_str().unwrap()]),
            ..ApacheSettings::default()
        });

        assert!(apache.test_and_reload().is_err());
        assert!(!marker.exists());
    }
}
