//! Hardcover catalog source
//!
//! [`SourceClient`] is the seam between the run loop and the upstream API:
//! production uses [`HardcoverClient`], tests script pages directly.

mod client;
pub mod models;
mod rate_gate;

pub use client::{HardcoverClient, BOOKS_QUERY};
pub use models::{
    CachedTags, CandidateBook, CandidateEdition, MalformedRecord, PageRecord, TagCount,
};
pub use rate_gate::RateGate;

use async_trait::async_trait;
use thiserror::Error;

/// Failures fetching a page. The run loop treats every variant the same way:
/// log, wait out the cooldown, restart from offset 0.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Hardcover returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    #[error("Response had no data")]
    MissingData,
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one page of candidate books, most popular first. Records are
    /// decoded individually; one that fails comes back as an `Err` entry.
    async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<PageRecord>, SourceError>;
}

#[async_trait]
impl<T: SourceClient + ?Sized> SourceClient for std::sync::Arc<T> {
    async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<PageRecord>, SourceError> {
        (**self).fetch_page(limit, offset).await
    }
}
