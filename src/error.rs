//! Error types for the Tollbooth service.

use thiserror::Error;

/// Main error type for Tollbooth operations.
#[derive(Error, Debug)]
pub enum TollboothError {
    /// Missing or malformed request parameters
    #[error("{0}")]
    Validation(String),

    /// No authenticated caller identity was supplied
    #[error("authentication required")]
    Unauthorized,

    /// Failures reading or writing the limit store
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollboothError {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        TollboothError::Validation(msg.into())
    }

    /// Whether the caller, rather than the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TollboothError::Validation(_) | TollboothError::Unauthorized)
    }
}

impl From<config::ConfigError> for TollboothError {
    fn from(err: config::ConfigError) -> Self {
        TollboothError::Config(err.to_string())
    }
}

/// Result type alias for Tollbooth operations.
pub type Result<T> = std::result::Result<T, TollboothError>;
