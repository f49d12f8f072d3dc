//! Error types for SOCLOG

use thiserror::Error;

/// Result type alias for SOCLOG operations
pub type Result<T> = std::result::Result<T, SoclogError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum SoclogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl SoclogError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
