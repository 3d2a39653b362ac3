//! Error types for the scraper

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScraperError>;

/// Errors raised by the import pipeline and its storage.
///
/// Page fetch failures have their own type ([`crate::source::SourceError`])
/// since the run loop recovers from them instead of propagating.
#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("duplicate key value violates unique constraint \"{constraint}\"")]
    UniqueViolation { constraint: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run ledger error: {0}")]
    Ledger(String),
}

impl ScraperError {
    /// The unique constraint this error tripped, if it was a duplicate key.
    pub fn violated_constraint(&self) -> Option<&str> {
        match self {
            ScraperError::Database(e) => e
                .as_database_error()
                .filter(|db| db.is_unique_violation())
                .and_then(|db| db.constraint()),
            ScraperError::UniqueViolation { constraint } => Some(constraint),
            _ => None,
        }
    }
}
