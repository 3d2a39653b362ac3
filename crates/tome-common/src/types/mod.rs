//! Catalog types shared across Tome services

mod isbn;

pub use isbn::{Isbn, IsbnKind};

use serde::{Deserialize, Serialize};

/// Where a catalog entity was imported from.
///
/// Stored as `external_source` next to `external_id`; together they are the
/// idempotency key for imported books and authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalSource {
    Hardcover,
}

impl ExternalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalSource::Hardcover => "hardcover",
        }
    }
}

impl std::fmt::Display for ExternalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance pair: the source system plus the id it assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRef {
    pub source: ExternalSource,
    pub id: String,
}

impl ExternalRef {
    pub fn new(source: ExternalSource, id: impl ToString) -> Self {
        Self {
            source,
            id: id.to_string(),
        }
    }

    pub fn hardcover(id: impl ToString) -> Self {
        Self::new(ExternalSource::Hardcover, id)
    }
}

impl std::fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}
