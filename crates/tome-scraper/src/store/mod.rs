//! Catalog and run-ledger persistence
//!
//! [`CatalogStore`] owns everything outside an edition import: the run
//! ledger, the error log and the pre-transaction existence checks.
//! [`CatalogTx`] is one open import transaction with savepoint support.
//!
//! Two implementations exist: [`PgCatalog`] for Postgres and
//! [`MemoryCatalog`] for dry runs and tests.

mod memory;
mod postgres;

pub use memory::{
    BookAuthorLink, BookGenreLink, CatalogSnapshot, MemoryCatalog, MemoryCatalogTx, StoredAuthor,
    StoredBook, StoredGenre,
};
pub use postgres::{PgCatalog, PgCatalogTx};

use crate::error::Result;
use crate::models::{NormalizedEdition, RunProgress, RunStatus, ScraperErrorRecord, ScraperRun};
use async_trait::async_trait;
use tome_common::types::{ExternalRef, Isbn};

/// Unique constraint on a book's provenance. Losing an insert race on it
/// means another writer already imported the edition.
pub const BOOK_PROVENANCE_CONSTRAINT: &str = "books_external_source_external_id_key";

/// Named savepoints used inside an import transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Savepoint {
    EditionInsert,
    AuthorLink,
    GenreLink,
}

impl Savepoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Savepoint::EditionInsert => "edition_insert",
            Savepoint::AuthorLink => "author_link",
            Savepoint::GenreLink => "genre_link",
        }
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    type Tx: CatalogTx;

    /// Open an import transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// The most recent run that is `running` or `stopped`, if any.
    async fn find_resumable_run(&self) -> Result<Option<ScraperRun>>;

    /// Insert a fresh `running` run at offset 0 and return its id.
    async fn create_run(&self) -> Result<i64>;

    /// Flip an existing run back to `running` and restart its clock.
    async fn reopen_run(&self, run_id: i64) -> Result<()>;

    /// Add counter deltas and move the resume cursor.
    async fn record_progress(&self, run_id: i64, progress: &RunProgress) -> Result<()>;

    /// Set the run's status and stamp `ended_at`. Notes are only
    /// overwritten when given.
    async fn close_run(&self, run_id: i64, status: RunStatus, notes: Option<&str>) -> Result<()>;

    async fn insert_error(&self, record: &ScraperErrorRecord) -> Result<()>;

    /// Whether a book with this provenance is already in the catalog.
    async fn edition_exists(&self, external: &ExternalRef) -> Result<bool>;

    /// Case-insensitive genre lookup.
    async fn genre_exists(&self, name: &str) -> Result<bool>;
}

/// One open import transaction.
///
/// After any failing statement the transaction must be rolled back to the
/// last savepoint (or entirely) before it can be used again.
#[async_trait]
pub trait CatalogTx: Send {
    async fn savepoint(&mut self, savepoint: Savepoint) -> Result<()>;
    async fn release_savepoint(&mut self, savepoint: Savepoint) -> Result<()>;
    async fn rollback_to_savepoint(&mut self, savepoint: Savepoint) -> Result<()>;

    /// The subset of `isbns` already present on a book in their own slot.
    async fn existing_isbns(&mut self, isbns: &[Isbn]) -> Result<Vec<Isbn>>;

    /// Insert the book row and return its id.
    async fn insert_book(&mut self, edition: &NormalizedEdition) -> Result<i64>;

    async fn find_author(&mut self, external: &ExternalRef) -> Result<Option<i64>>;

    async fn insert_author(&mut self, author: &NewAuthor<'_>) -> Result<i64>;

    /// Case-insensitive lookup by name.
    async fn find_genre(&mut self, name: &str) -> Result<Option<i64>>;

    async fn insert_genre(&mut self, name: &str) -> Result<i64>;

    /// Insert-if-absent. Returns `false` when the link already existed.
    async fn link_author(&mut self, book_id: i64, author_id: i64, order: i32) -> Result<bool>;

    /// Insert-if-absent. Returns `false` when the link already existed.
    async fn link_genre(&mut self, book_id: i64, genre_id: i64) -> Result<bool>;

    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}

/// Author row to insert
#[derive(Debug, Clone, Copy)]
pub struct NewAuthor<'a> {
    pub external: &'a ExternalRef,
    pub name: &'a str,
    pub bio: &'a str,
    pub birth_year: Option<i32>,
    pub death_year: Option<i32>,
}
