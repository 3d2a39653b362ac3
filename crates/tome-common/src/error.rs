//! Error types shared across Tome services

use thiserror::Error;

/// Result type alias for Tome operations
pub type Result<T> = std::result::Result<T, TomeError>;

/// Main error type for shared Tome code
#[derive(Error, Debug)]
pub enum TomeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid {kind}: {value}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}
