//! CLI-specific error types

use thiserror::Error;

use crate::store::StoreError;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Store(#[from] StoreError),
}

impl CliError {
    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        CliError::Config(msg.into())
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        CliError::Io(msg.into())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::io_error(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
