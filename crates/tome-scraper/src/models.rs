//! Core types shared by the pipeline, the ledger and the stores

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tome_common::types::{ExternalRef, Isbn};

/// Language code stored on every imported book.
pub const CATALOG_LANGUAGE: &str = "en";

/// A validated edition, ready to be written as a book row
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEdition {
    /// `hardcover:<edition id>`
    pub external: ExternalRef,
    pub title: String,
    pub subtitle: Option<String>,
    pub isbn_10: Option<Isbn>,
    pub isbn_13: Option<Isbn>,
    pub publisher: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub page_count: Option<i32>,
    pub description: Option<String>,
    pub language: &'static str,
    /// Runtime of the default audio edition, if one exists
    pub audio_seconds: Option<i32>,
    /// Page count of the default ebook edition, if one exists
    pub ebook_page_count: Option<i32>,
    pub authors: Vec<AuthorCandidate>,
}

/// An author credited on an edition, as reported by the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorCandidate {
    pub external: ExternalRef,
    pub name: String,
    pub bio: Option<String>,
    pub birth_year: Option<i32>,
    pub death_year: Option<i32>,
}

impl AuthorCandidate {
    /// Authors without a biography are not added to the catalog.
    pub fn has_bio(&self) -> bool {
        self.bio.as_deref().is_some_and(|b| !b.trim().is_empty())
    }
}

/// Scraper run status (maps to `scraper_runs.status`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopped,
    Failed,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
        }
    }

    /// Runs a new process may pick up again.
    pub fn is_resumable(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Stopped)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Completed)
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => RunStatus::Running,
            "stopped" => RunStatus::Stopped,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Failed,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scraper execution (maps to `scraper_runs`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperRun {
    pub id: i64,
    pub status: RunStatus,
    pub last_offset: i64,
    pub last_hardcover_book_id: Option<i64>,
    pub books_processed: i64,
    pub editions_imported: i64,
    pub authors_imported: i64,
    pub errors_count: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Counter deltas and cursor written after each page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub books_processed: i64,
    pub editions_imported: i64,
    pub authors_imported: i64,
    pub errors_count: i64,
    pub last_hardcover_book_id: Option<i64>,
    /// New resume offset; `None` leaves the stored offset untouched.
    pub last_offset: Option<i64>,
}

/// Error record category (maps to `scraper_errors.error_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The edition was rejected by validation or the book insert failed
    Import,
    /// An unexpected fault while handling one record
    Processing,
    /// An author or genre link failed; the edition was still imported
    Link,
    /// The run could not continue
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Import => "import_error",
            ErrorCategory::Processing => "processing_error",
            ErrorCategory::Link => "link_error",
            ErrorCategory::Fatal => "fatal_error",
        }
    }
}

/// What an error record is about (maps to `scraper_errors.hardcover_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSubject {
    Book,
    Edition,
    Scraper,
}

impl ErrorSubject {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSubject::Book => "book",
            ErrorSubject::Edition => "edition",
            ErrorSubject::Scraper => "scraper",
        }
    }
}

/// Append-only audit entry (maps to `scraper_errors`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperErrorRecord {
    pub run_id: i64,
    pub category: ErrorCategory,
    pub subject: ErrorSubject,
    pub subject_id: Option<i64>,
    pub message: String,
    pub detail: Option<String>,
}
