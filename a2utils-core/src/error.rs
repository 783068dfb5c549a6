//! Error types for a2utils

use thiserror::Error;

/// Result type for a2utils operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for a2utils
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// External command could not be started or exited with failure
    #[error("Command '{cmd}' failed (exit code {code:?}): {stderr}")]
    Command {
        cmd: String,
        code: Option<i32>,
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
