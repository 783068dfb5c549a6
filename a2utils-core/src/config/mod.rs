//! Runtime settings

mod loader;
mod types;

pub use loader::{SettingsLoader, SETTINGS_ENV, SYSTEM_SETTINGS};
pub use types::*;
