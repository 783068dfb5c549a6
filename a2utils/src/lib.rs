//! a2utils - apache2 config file utilities
//!
//! Shared pieces of the `a2conf`, `a2vhost`, `a2okerr`, `a2certbot` and
//! `a2certbotssh` binaries.

pub mod okerr;

pub use okerr::{Indicator, OkerrClient, OkerrError};

use a2utils_core::{Settings, SettingsLoader};
use clap::Args;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Flags every binary accepts
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// More logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// a2utils settings file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,
}

impl CommonArgs {
    pub fn init_logging(&self) {
        init_logging(self.verbose);
    }

    pub fn load_settings(&self) -> a2utils_core::Result<Settings> {
        SettingsLoader::load(self.settings.as_deref())
    }
}

/// Log to stderr; `RUST_LOG` wins over the verbosity flag
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbosity)));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(0), "warn");
        assert_eq!(default_level(1), "info");
        assert_eq!(default_level(5), "debug");
    }

    #[test]
    fn test_load_settings_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a2utils.toml");
        std::fs::write(&path, "[vhost]\nbasedir = \"/srv/www\"\n").unwrap();

        let args = CommonArgs {
            verbose: 0,
            settings: Some(path),
        };
        let settings = args.load_settings().unwrap();
        assert_eq!(settings.vhost.basedir, PathBuf::from("/srv/www"));
    }
}
