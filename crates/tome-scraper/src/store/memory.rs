//! In-memory catalog store
//!
//! Backs `--dry-run` and the test suite. Transactions work on a copy of the
//! catalog tables and publish it on commit; savepoints are stacked copies.
//! Like Postgres, a failed statement poisons the transaction until it is
//! rolled back to a savepoint.

use super::{CatalogStore, CatalogTx, NewAuthor, Savepoint};
use crate::error::{Result, ScraperError};
use crate::models::{NormalizedEdition, RunProgress, RunStatus, ScraperErrorRecord, ScraperRun};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tome_common::types::{ExternalRef, Isbn, IsbnKind};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredBook {
    pub id: i64,
    pub edition: NormalizedEdition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAuthor {
    pub id: i64,
    pub external: ExternalRef,
    pub name: String,
    pub bio: String,
    pub birth_year: Option<i32>,
    pub death_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredGenre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookAuthorLink {
    pub book_id: i64,
    pub author_id: i64,
    pub author_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookGenreLink {
    pub book_id: i64,
    pub genre_id: i64,
}

/// Catalog tables as of the last commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub books: Vec<StoredBook>,
    pub authors: Vec<StoredAuthor>,
    pub genres: Vec<StoredGenre>,
    pub book_authors: Vec<BookAuthorLink>,
    pub book_genres: Vec<BookGenreLink>,
    next_id: i64,
}

impl CatalogSnapshot {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn book_by_external(&self, external: &ExternalRef) -> Option<&StoredBook> {
        self.books.iter().find(|b| &b.edition.external == external)
    }

    pub fn authors_of(&self, book_id: i64) -> Vec<&BookAuthorLink> {
        let mut links: Vec<_> = self.book_authors.iter().filter(|l| l.book_id == book_id).collect();
        links.sort_by_key(|l| l.author_order);
        links
    }

    pub fn genre_names_of(&self, book_id: i64) -> Vec<&str> {
        self.book_genres
            .iter()
            .filter(|l| l.book_id == book_id)
            .filter_map(|l| self.genres.iter().find(|g| g.id == l.genre_id))
            .map(|g| g.name.as_str())
            .collect()
    }

    fn find_genre(&self, name: &str) -> Option<&StoredGenre> {
        let wanted = name.trim().to_lowercase();
        self.genres.iter().find(|g| g.name.to_lowercase() == wanted)
    }
}

#[derive(Debug, Default)]
struct LedgerTables {
    runs: Vec<ScraperRun>,
    errors: Vec<ScraperErrorRecord>,
    next_run_id: i64,
}

/// Statements that should fail, keyed by what they touch.
#[derive(Debug, Default)]
struct FaultPlan {
    author_links: HashSet<String>,
    genre_links: HashSet<String>,
    book_inserts: HashSet<String>,
    stale_edition_checks: HashSet<String>,
    progress_updates: bool,
}

#[derive(Debug, Default)]
struct Shared {
    catalog: Mutex<CatalogSnapshot>,
    ledger: Mutex<LedgerTables>,
    faults: Mutex<FaultPlan>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    shared: Arc<Shared>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        lock(&self.shared.catalog).clone()
    }

    pub fn runs(&self) -> Vec<ScraperRun> {
        lock(&self.shared.ledger).runs.clone()
    }

    pub fn errors(&self) -> Vec<ScraperErrorRecord> {
        lock(&self.shared.ledger).errors.clone()
    }

    /// Add a genre to the committed catalog.
    pub fn seed_genre(&self, name: &str) -> i64 {
        let mut catalog = lock(&self.shared.catalog);
        let id = catalog.next_id();
        catalog.genres.push(StoredGenre {
            id,
            name: name.to_string(),
        });
        id
    }

    /// Add a run row as if left behind by an earlier process.
    pub fn seed_run(&self, status: RunStatus, last_offset: i64, editions_imported: i64) -> i64 {
        let mut ledger = lock(&self.shared.ledger);
        ledger.next_run_id += 1;
        let id = ledger.next_run_id;
        ledger.runs.push(ScraperRun {
            id,
            status,
            last_offset,
            last_hardcover_book_id: None,
            books_processed: editions_imported,
            editions_imported,
            authors_imported: 0,
            errors_count: 0,
            started_at: Utc::now(),
            ended_at: None,
            notes: None,
        });
        id
    }

    #[cfg(test)]
    pub(crate) fn fail_author_link(&self, author_external_id: &str) {
        lock(&self.shared.faults)
            .author_links
            .insert(author_external_id.to_string());
    }

    #[cfg(test)]
    pub(crate) fn fail_genre_link(&self, genre_name: &str) {
        lock(&self.shared.faults)
            .genre_links
            .insert(genre_name.to_lowercase());
    }

    #[cfg(test)]
    pub(crate) fn fail_book_insert(&self, edition_external_id: &str) {
        lock(&self.shared.faults)
            .book_inserts
            .insert(edition_external_id.to_string());
    }

    /// Make `edition_exists` miss this edition, as it would when another
    /// writer commits it between the check and the insert.
    #[cfg(test)]
    pub(crate) fn stale_edition_check(&self, edition_external_id: &str) {
        lock(&self.shared.faults)
            .stale_edition_checks
            .insert(edition_external_id.to_string());
    }

    #[cfg(test)]
    pub(crate) fn fail_progress_updates(&self) {
        lock(&self.shared.faults).progress_updates = true;
    }

    fn with_run<F>(&self, run_id: i64, f: F) -> Result<()>
    where
        F: FnOnce(&mut ScraperRun),
    {
        let mut ledger = lock(&self.shared.ledger);
        let run = ledger
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| ScraperError::Ledger(format!("Run {run_id} not found")))?;
        f(run);
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    type Tx = MemoryCatalogTx;

    async fn begin(&self) -> Result<MemoryCatalogTx> {
        Ok(MemoryCatalogTx {
            shared: self.shared.clone(),
            working: self.snapshot(),
            savepoints: Vec::new(),
            aborted: false,
        })
    }

    async fn find_resumable_run(&self) -> Result<Option<ScraperRun>> {
        let ledger = lock(&self.shared.ledger);
        Ok(ledger
            .runs
            .iter()
            .filter(|r| r.status.is_resumable())
            .max_by_key(|r| (r.started_at, r.id))
            .cloned())
    }

    async fn create_run(&self) -> Result<i64> {
        let mut ledger = lock(&self.shared.ledger);
        if ledger.runs.iter().any(|r| r.status.is_resumable()) {
            return Err(ScraperError::Ledger(
                "duplicate key value violates unique constraint \"scraper_runs_single_resumable_idx\""
                    .to_string(),
            ));
        }
        ledger.next_run_id += 1;
        let id = ledger.next_run_id;
        ledger.runs.push(ScraperRun {
            id,
            status: RunStatus::Running,
            last_offset: 0,
            last_hardcover_book_id: None,
            books_processed: 0,
            editions_imported: 0,
            authors_imported: 0,
            errors_count: 0,
            started_at: Utc::now(),
            ended_at: None,
            notes: None,
        });
        Ok(id)
    }

    async fn reopen_run(&self, run_id: i64) -> Result<()> {
        self.with_run(run_id, |run| {
            run.status = RunStatus::Running;
            run.started_at = Utc::now();
            run.ended_at = None;
        })
    }

    async fn record_progress(&self, run_id: i64, progress: &RunProgress) -> Result<()> {
        if lock(&self.shared.faults).progress_updates {
            return Err(ScraperError::Ledger(
                "simulated failure updating run progress".to_string(),
            ));
        }
        self.with_run(run_id, |run| {
            run.books_processed += progress.books_processed;
            run.editions_imported += progress.editions_imported;
            run.authors_imported += progress.authors_imported;
            run.errors_count += progress.errors_count;
            if let Some(id) = progress.last_hardcover_book_id {
                run.last_hardcover_book_id = Some(id);
            }
            if let Some(offset) = progress.last_offset {
                run.last_offset = offset;
            }
        })
    }

    async fn close_run(&self, run_id: i64, status: RunStatus, notes: Option<&str>) -> Result<()> {
        self.with_run(run_id, |run| {
            run.status = status;
            run.ended_at = (status != RunStatus::Running).then(Utc::now);
            if let Some(notes) = notes {
                run.notes = Some(notes.to_string());
            }
        })
    }

    async fn insert_error(&self, record: &ScraperErrorRecord) -> Result<()> {
        lock(&self.shared.ledger).errors.push(record.clone());
        Ok(())
    }

    async fn edition_exists(&self, external: &ExternalRef) -> Result<bool> {
        if lock(&self.shared.faults)
            .stale_edition_checks
            .contains(&external.id)
        {
            return Ok(false);
        }
        Ok(lock(&self.shared.catalog).book_by_external(external).is_some())
    }

    async fn genre_exists(&self, name: &str) -> Result<bool> {
        Ok(lock(&self.shared.catalog).find_genre(name).is_some())
    }
}

pub struct MemoryCatalogTx {
    shared: Arc<Shared>,
    working: CatalogSnapshot,
    savepoints: Vec<(Savepoint, CatalogSnapshot)>,
    aborted: bool,
}

impl MemoryCatalogTx {
    fn check_open(&self) -> Result<()> {
        if self.aborted {
            return Err(ScraperError::Store(
                "current transaction is aborted, commands ignored until end of transaction block"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn fail(&mut self, message: impl Into<String>) -> ScraperError {
        self.aborted = true;
        ScraperError::Store(message.into())
    }

    fn violate(&mut self, constraint: &str) -> ScraperError {
        self.aborted = true;
        ScraperError::UniqueViolation {
            constraint: constraint.to_string(),
        }
    }

    fn savepoint_index(&self, savepoint: Savepoint) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(name, _)| *name == savepoint)
            .ok_or_else(|| {
                ScraperError::Store(format!("savepoint \"{}\" does not exist", savepoint.as_str()))
            })
    }
}

#[async_trait]
impl CatalogTx for MemoryCatalogTx {
    async fn savepoint(&mut self, savepoint: Savepoint) -> Result<()> {
        self.check_open()?;
        self.savepoints.push((savepoint, self.working.clone()));
        Ok(())
    }

    async fn release_savepoint(&mut self, savepoint: Savepoint) -> Result<()> {
        self.check_open()?;
        let index = self.savepoint_index(savepoint)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, savepoint: Savepoint) -> Result<()> {
        let index = self.savepoint_index(savepoint)?;
        self.savepoints.truncate(index + 1);
        self.working = self.savepoints[index].1.clone();
        self.aborted = false;
        Ok(())
    }

    async fn existing_isbns(&mut self, isbns: &[Isbn]) -> Result<Vec<Isbn>> {
        self.check_open()?;
        Ok(isbns
            .iter()
            .filter(|isbn| {
                self.working.books.iter().any(|b| {
                    let slot = match isbn.kind() {
                        IsbnKind::Isbn10 => &b.edition.isbn_10,
                        IsbnKind::Isbn13 => &b.edition.isbn_13,
                    };
                    slot.as_ref() == Some(*isbn)
                })
            })
            .cloned()
            .collect())
    }

    async fn insert_book(&mut self, edition: &NormalizedEdition) -> Result<i64> {
        self.check_open()?;
        if lock(&self.shared.faults)
            .book_inserts
            .contains(&edition.external.id)
        {
            return Err(self.fail("simulated failure inserting book"));
        }

        let clash = self.working.books.iter().find_map(|b| {
            if b.edition.external == edition.external {
                Some("books_external_source_external_id_key")
            } else if edition.isbn_10.is_some() && b.edition.isbn_10 == edition.isbn_10 {
                Some("books_isbn_10_key")
            } else if edition.isbn_13.is_some() && b.edition.isbn_13 == edition.isbn_13 {
                Some("books_isbn_13_key")
            } else {
                None
            }
        });
        if let Some(constraint) = clash {
            return Err(self.violate(constraint));
        }

        let id = self.working.next_id();
        self.working.books.push(StoredBook {
            id,
            edition: edition.clone(),
        });
        Ok(id)
    }

    async fn find_author(&mut self, external: &ExternalRef) -> Result<Option<i64>> {
        self.check_open()?;
        Ok(self
            .working
            .authors
            .iter()
            .find(|a| &a.external == external)
            .map(|a| a.id))
    }

    async fn insert_author(&mut self, author: &NewAuthor<'_>) -> Result<i64> {
        self.check_open()?;
        if self.working.authors.iter().any(|a| &a.external == author.external) {
            return Err(self.violate("authors_external_source_external_id_key"));
        }
        let id = self.working.next_id();
        self.working.authors.push(StoredAuthor {
            id,
            external: author.external.clone(),
            name: author.name.to_string(),
            bio: author.bio.to_string(),
            birth_year: author.birth_year,
            death_year: author.death_year,
        });
        Ok(id)
    }

    async fn find_genre(&mut self, name: &str) -> Result<Option<i64>> {
        self.check_open()?;
        Ok(self.working.find_genre(name).map(|g| g.id))
    }

    async fn insert_genre(&mut self, name: &str) -> Result<i64> {
        self.check_open()?;
        if self.working.find_genre(name).is_some() {
            return Err(self.violate("genres_name_lower_idx"));
        }
        let id = self.working.next_id();
        self.working.genres.push(StoredGenre {
            id,
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn link_author(&mut self, book_id: i64, author_id: i64, order: i32) -> Result<bool> {
        self.check_open()?;
        let author = self.working.authors.iter().find(|a| a.id == author_id).cloned();
        let Some(author) = author else {
            return Err(self.fail(
                "insert or update on table \"book_authors\" violates foreign key constraint",
            ));
        };
        if lock(&self.shared.faults).author_links.contains(&author.external.id) {
            return Err(self.fail("simulated failure linking author"));
        }
        if self
            .working
            .book_authors
            .iter()
            .any(|l| l.book_id == book_id && l.author_id == author_id)
        {
            return Ok(false);
        }
        self.working.book_authors.push(BookAuthorLink {
            book_id,
            author_id,
            author_order: order,
        });
        Ok(true)
    }

    async fn link_genre(&mut self, book_id: i64, genre_id: i64) -> Result<bool> {
        self.check_open()?;
        let genre = self.working.genres.iter().find(|g| g.id == genre_id).cloned();
        let Some(genre) = genre else {
            return Err(self.fail(
                "insert or update on table \"book_genres\" violates foreign key constraint",
            ));
        };
        if lock(&self.shared.faults)
            .genre_links
            .contains(&genre.name.to_lowercase())
        {
            return Err(self.fail("simulated failure linking genre"));
        }
        if self
            .working
            .book_genres
            .iter()
            .any(|l| l.book_id == book_id && l.genre_id == genre_id)
        {
            return Ok(false);
        }
        self.working.book_genres.push(BookGenreLink { book_id, genre_id });
        Ok(true)
    }

    async fn commit(self) -> Result<()> {
        self.check_open()?;
        *lock(&self.shared.catalog) = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
