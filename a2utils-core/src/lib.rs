//! a2utils Core Library
//!
//! This crate provides the pieces shared by every a2utils tool:
//! runtime settings, the error type and apache service control.

pub mod apache;
pub mod config;
pub mod error;

pub use apache::Apache;
pub use config::{Settings, SettingsLoader};
pub use error::{Error, Result};

/// a2utils version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
