//! Settings loader

use crate::config::Settings;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// System-wide settings file
pub const SYSTEM_SETTINGS: &str = "/etc/a2utils.toml";

/// Environment variable naming an explicit settings file
pub const SETTINGS_ENV: &str = "A2UTILS_CONFIG";

/// Settings loader for the a2utils tools
pub struct SettingsLoader;

impl SettingsLoader {
    /// Load settings: explicit path, `$A2UTILS_CONFIG`, system file, user file,
    /// then built-in defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Settings> {
        let mut settings = match Self::locate(explicit) {
            Some(path) => {
                tracing::debug!("📄 Loading settings from {}", path.display());
                Self::load_file(&path)?
            }
            None => {
                tracing::debug!("Using built-in settings");
                Settings::default()
            }
        };

        Self::apply_env(&mut settings, |key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load_file(path: &Path) -> Result<Settings> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse TOML settings
    pub fn from_toml(content: &str) -> Result<Settings> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Pick the settings file to use, if any
    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            return Some(PathBuf::from(path));
        }

        let system = PathBuf::from(SYSTEM_SETTINGS);
        if system.is_file() {
            return Some(system);
        }

        dirs::config_dir()
            .map(|dir| dir.join("a2utils").join("config.toml"))
            .filter(|path| path.is_file())
    }

    /// Apply `A2UTILS_*` overrides using the given lookup
    pub fn apply_env<F>(settings: &mut Settings, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(conf) = lookup("A2UTILS_APACHE_CONF") {
            settings.apache.root_config = PathBuf::from(conf);
        }
        if let Some(url) = lookup("A2UTILS_OKERR_URL") {
            settings.okerr.url = url;
        }
        if let Some(secret) = lookup("A2UTILS_OKERR_SECRET") {
            settings.okerr.secret = Some(secret);
        }
        if let Some(textid) = lookup("A2UTILS_OKERR_TEXTID") {
            settings.okerr.textid = Some(textid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_debian_layout() {
        let settings = Settings::default();
        assert_eq!(settings.apache.root_config, PathBuf::from("/etc/apache2/apache2.conf"));
        assert_eq!(settings.apache.sites_enabled, PathBuf::from("/etc/apache2/sites-enabled"));
        assert_eq!(settings.certbot.renew_days, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [apache]
            root_config = "/srv/httpd/httpd.conf"

            [okerr]
            prefix = "web1:"
            tags = ["ssl", "web"]
        "#;
        let settings = SettingsLoader::from_toml(toml).unwrap();
        assert_eq!(settings.apache.root_config, PathBuf::from("/srv/httpd/httpd.conf"));
        assert_eq!(settings.apache.ctl, "apache2ctl");
        assert_eq!(settings.okerr.prefix, "web1:");
        assert_eq!(settings.okerr.tags, vec!["ssl", "web"]);
        assert_eq!(settings.okerr.policy, "Default");
    }

    #[test]
    fn test_invalid_toml() {
        let err = SettingsLoader::from_toml("[apache\nroot_config = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a2utils.toml");
        std::fs::write(&path, "[certbot]\nrenew_days = 7\n").unwrap();

        let settings = SettingsLoader::load_file(&path).unwrap();
        assert_eq!(settings.certbot.renew_days, 7);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("A2UTILS_APACHE_CONF", "/tmp/apache.conf"),
            ("A2UTILS_OKERR_SECRET", "s3cret"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        SettingsLoader::apply_env(&mut settings, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.apache.root_config, PathBuf::from("/tmp/apache.conf"));
        assert_eq!(settings.okerr.secret.as_deref(), Some("s3cret"));
        assert_eq!(settings.okerr.textid, None);
    }
}
