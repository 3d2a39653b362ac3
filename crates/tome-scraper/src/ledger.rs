//! Durable run ledger
//!
//! Wraps the store's run and error tables for one run. Ledger writes are
//! required for a correct resume, so their failures propagate. Error records
//! are best effort.

use crate::error::Result;
use crate::models::{ErrorCategory, ErrorSubject, RunProgress, RunStatus, ScraperErrorRecord};
use crate::store::CatalogStore;
use tracing::{error, info};

/// Where a run starts paging from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub resumed: bool,
    pub offset: i64,
    pub last_hardcover_book_id: Option<i64>,
    /// Editions the run had already imported before this process
    pub editions_imported: i64,
}

pub struct RunLedger<'a, S> {
    store: &'a S,
    run_id: i64,
}

impl<'a, S: CatalogStore> RunLedger<'a, S> {
    /// Resume the latest `running`/`stopped` run, or start a fresh one.
    pub async fn open(store: &'a S) -> Result<(Self, ResumePoint)> {
        if let Some(run) = store.find_resumable_run().await? {
            store.reopen_run(run.id).await?;
            info!(
                run_id = run.id,
                offset = run.last_offset,
                editions_imported = run.editions_imported,
                "Resuming scraper run"
            );
            let point = ResumePoint {
                resumed: true,
                offset: run.last_offset,
                last_hardcover_book_id: run.last_hardcover_book_id,
                editions_imported: run.editions_imported,
            };
            return Ok((Self { store, run_id: run.id }, point));
        }

        let run_id = store.create_run().await?;
        info!(run_id, "Started new scraper run");
        Ok((
            Self { store, run_id },
            ResumePoint {
                resumed: false,
                offset: 0,
                last_hardcover_book_id: None,
                editions_imported: 0,
            },
        ))
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub async fn record_batch(&self, progress: &RunProgress) -> Result<()> {
        self.store.record_progress(self.run_id, progress).await
    }

    pub async fn complete(&self, notes: &str) -> Result<()> {
        self.store
            .close_run(self.run_id, RunStatus::Completed, Some(notes))
            .await
    }

    pub async fn stop(&self, notes: &str) -> Result<()> {
        self.store
            .close_run(self.run_id, RunStatus::Stopped, Some(notes))
            .await
    }

    pub async fn fail(&self, notes: &str) -> Result<()> {
        self.store
            .close_run(self.run_id, RunStatus::Failed, Some(notes))
            .await
    }

    /// Append an error record. A failure to write it is logged, not returned.
    pub async fn log_error(
        &self,
        category: ErrorCategory,
        subject: ErrorSubject,
        subject_id: Option<i64>,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        let record = ScraperErrorRecord {
            run_id: self.run_id,
            category,
            subject,
            subject_id,
            message: message.into(),
            detail,
        };
        if let Err(e) = self.store.insert_error(&record).await {
            error!(
                error = %e,
                error_type = category.as_str(),
                message = %record.message,
                "Failed to record scraper error"
            );
        }
    }
}
