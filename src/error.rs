//! Error types for the Ratewarden service.

use thiserror::Error;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum RatewardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counting backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// Counting backend did not answer within the deadline
    #[error("Backend timed out")]
    Timeout,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RatewardenError>;
