//! The run loop
//!
//! Pages through Hardcover by popularity, imports each record's default
//! physical edition, and records progress in the run ledger after every
//! page. Runs until the import target is reached, a shutdown is requested,
//! or a fatal error occurs.

use crate::config::RunConfig;
use crate::error::Result;
use crate::ledger::{ResumePoint, RunLedger};
use crate::models::{ErrorCategory, ErrorSubject, RunProgress};
use crate::pipeline::{
    EditionImport, EditionImporter, GenreSelection, ImportOutcome, RecordNormalizer,
    ReferenceResolver, Rejection,
};
use crate::shutdown::SharedShutdown;
use crate::source::{CandidateBook, MalformedRecord, PageRecord, SourceClient};
use crate::store::CatalogStore;
use std::time::Duration;
use tome_common::types::ExternalRef;
use tracing::{debug, error, info, warn};

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Completed,
    Stopped,
}

/// Totals for this process; the ledger holds the run-wide numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: i64,
    pub exit: RunExit,
    pub resumed: bool,
    pub books_processed: i64,
    pub editions_imported: i64,
    pub authors_imported: i64,
    pub errors_count: i64,
}

/// Outcome of one record, before it is folded into the page counters
enum RecordOutcome {
    Imported(ImportOutcome),
    Skipped,
}

#[derive(Debug, Default)]
struct PageTally {
    books_processed: i64,
    editions_imported: i64,
    authors_imported: i64,
    errors_count: i64,
    last_hardcover_book_id: Option<i64>,
    interrupted: bool,
}

pub struct Scraper<S, C> {
    store: S,
    source: C,
    normalizer: RecordNormalizer,
    config: RunConfig,
    shutdown: SharedShutdown,
}

impl<S: CatalogStore, C: SourceClient> Scraper<S, C> {
    pub fn new(store: S, source: C, config: RunConfig, shutdown: SharedShutdown) -> Self {
        Self {
            store,
            source,
            normalizer: RecordNormalizer::new(config.genre_min_tag_count),
            config,
            shutdown,
        }
    }

    /// Run until completion, shutdown, or a fatal error.
    ///
    /// A fatal error is written to the error log, the run is marked
    /// `failed`, and the error is returned.
    pub async fn run(&self) -> Result<RunSummary> {
        let (ledger, resume) = RunLedger::open(&self.store).await?;
        let mut resolver = ReferenceResolver::new();

        match self.drive(&ledger, &mut resolver, resume).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!(run_id = ledger.run_id(), error = %e, "Scraper failed");
                ledger
                    .log_error(
                        ErrorCategory::Fatal,
                        ErrorSubject::Scraper,
                        None,
                        e.to_string(),
                        Some(format!("{e:?}")),
                    )
                    .await;
                if let Err(close_err) = ledger.fail(&format!("Fatal error: {e}")).await {
                    error!(error = %close_err, "Failed to mark run as failed");
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        ledger: &RunLedger<'_, S>,
        resolver: &mut ReferenceResolver,
        resume: ResumePoint,
    ) -> Result<RunSummary> {
        let batch_size = self.config.batch_size;
        let mut offset = resume.offset;
        let mut run_imported = resume.editions_imported;
        let mut summary = RunSummary {
            run_id: ledger.run_id(),
            exit: RunExit::Stopped,
            resumed: resume.resumed,
            books_processed: 0,
            editions_imported: 0,
            authors_imported: 0,
            errors_count: 0,
        };

        info!(
            run_id = ledger.run_id(),
            offset,
            last_book_id = ?resume.last_hardcover_book_id,
            target = self.config.target_books,
            "Scraper running"
        );

        loop {
            if run_imported >= self.config.target_books {
                return self.complete(ledger, summary, run_imported).await;
            }
            if self.shutdown.is_requested() {
                break;
            }

            info!(offset, limit = batch_size, "Fetching books batch");
            let page = match self.source.fetch_page(batch_size, offset).await {
                Ok(page) if !page.is_empty() => page,
                Ok(_) => {
                    info!(offset, "No books returned, starting over from the beginning");
                    offset = 0;
                    self.pause(self.config.empty_page_cooldown()).await;
                    continue;
                }
                Err(e) => {
                    warn!(
                        offset,
                        error = %e,
                        "Failed to fetch books, starting over from the beginning"
                    );
                    offset = 0;
                    self.pause(self.config.empty_page_cooldown()).await;
                    continue;
                }
            };

            let tally = self.process_page(ledger, resolver, &page).await;

            if !tally.interrupted {
                offset += batch_size;
            }
            ledger
                .record_batch(&RunProgress {
                    books_processed: tally.books_processed,
                    editions_imported: tally.editions_imported,
                    authors_imported: tally.authors_imported,
                    errors_count: tally.errors_count,
                    last_hardcover_book_id: tally.last_hardcover_book_id,
                    last_offset: (!tally.interrupted).then_some(offset),
                })
                .await?;

            run_imported += tally.editions_imported;
            summary.books_processed += tally.books_processed;
            summary.editions_imported += tally.editions_imported;
            summary.authors_imported += tally.authors_imported;
            summary.errors_count += tally.errors_count;

            info!(
                books = tally.books_processed,
                imported = tally.editions_imported,
                errors = tally.errors_count,
                run_imported,
                target = self.config.target_books,
                next_offset = offset,
                "Batch complete"
            );

            if tally.interrupted {
                break;
            }
            if run_imported >= self.config.target_books {
                return self.complete(ledger, summary, run_imported).await;
            }

            self.pause(self.config.batch_delay()).await;
        }

        info!(
            run_id = ledger.run_id(),
            resume_offset = offset,
            "Shutdown requested, stopping run"
        );
        ledger.stop("Gracefully stopped by signal").await?;
        summary.exit = RunExit::Stopped;
        Ok(summary)
    }

    async fn complete(
        &self,
        ledger: &RunLedger<'_, S>,
        mut summary: RunSummary,
        run_imported: i64,
    ) -> Result<RunSummary> {
        info!(
            run_id = ledger.run_id(),
            run_imported,
            target = self.config.target_books,
            "Reached import target"
        );
        ledger
            .complete(&format!("Successfully imported {run_imported} books"))
            .await?;
        summary.exit = RunExit::Completed;
        Ok(summary)
    }

    /// Handle every record of the page, or stop early on shutdown.
    /// Per-record faults are counted and logged, never propagated.
    async fn process_page(
        &self,
        ledger: &RunLedger<'_, S>,
        resolver: &mut ReferenceResolver,
        page: &[PageRecord],
    ) -> PageTally {
        let mut tally = PageTally::default();

        for record in page {
            if self.shutdown.is_requested() {
                tally.interrupted = true;
                break;
            }

            tally.books_processed += 1;
            let book = match record {
                Ok(book) => book,
                Err(malformed) => {
                    tally.errors_count += 1;
                    if malformed.book_id.is_some() {
                        tally.last_hardcover_book_id = malformed.book_id;
                    }
                    self.log_malformed(ledger, malformed).await;
                    continue;
                }
            };
            tally.last_hardcover_book_id = Some(book.id);

            match self.process_book(resolver, book).await {
                Ok(RecordOutcome::Skipped) => {}
                Ok(RecordOutcome::Imported(ImportOutcome::Imported {
                    authors_linked,
                    link_failures,
                    ..
                })) => {
                    tally.editions_imported += 1;
                    tally.authors_imported += authors_linked;
                    for failure in link_failures {
                        ledger
                            .log_error(
                                ErrorCategory::Link,
                                ErrorSubject::Edition,
                                failure.edition.id.parse().ok(),
                                failure.to_string(),
                                None,
                            )
                            .await;
                    }
                }
                Ok(RecordOutcome::Imported(ImportOutcome::Rejected(rejection))) => {
                    tally.errors_count += 1;
                    if rejection.is_ignorable() {
                        debug!(book_id = book.id, reason = %rejection, "Skipping known edition");
                    } else {
                        warn!(book_id = book.id, reason = %rejection, "Edition not imported");
                        ledger
                            .log_error(
                                ErrorCategory::Import,
                                ErrorSubject::Edition,
                                book.default_physical_edition.as_ref().map(|e| e.id),
                                rejection.to_string(),
                                None,
                            )
                            .await;
                    }
                }
                Err(e) => {
                    tally.errors_count += 1;
                    error!(book_id = book.id, error = %e, "Error processing book");
                    ledger
                        .log_error(
                            ErrorCategory::Processing,
                            ErrorSubject::Book,
                            Some(book.id),
                            e.to_string(),
                            Some(format!("{e:?}")),
                        )
                        .await;
                }
            }
        }

        tally
    }

    async fn log_malformed(&self, ledger: &RunLedger<'_, S>, malformed: &MalformedRecord) {
        error!(book_id = ?malformed.book_id, error = %malformed, "Error processing book");
        ledger
            .log_error(
                ErrorCategory::Processing,
                ErrorSubject::Book,
                malformed.book_id,
                malformed.to_string(),
                None,
            )
            .await;
    }

    async fn process_book(
        &self,
        resolver: &mut ReferenceResolver,
        book: &CandidateBook,
    ) -> Result<RecordOutcome> {
        let Some(edition) = book.default_physical_edition.as_ref() else {
            warn!(
                book_id = book.id,
                title = book.title.as_deref().unwrap_or("<untitled>"),
                "No physical edition, skipping"
            );
            return Ok(RecordOutcome::Skipped);
        };

        if self
            .store
            .edition_exists(&ExternalRef::hardcover(edition.id))
            .await?
        {
            debug!(edition_id = edition.id, "Edition already imported, skipping");
            return Ok(RecordOutcome::Skipped);
        }

        let genre_names = match self.normalizer.select_genres(&book.cached_tags) {
            GenreSelection::Popular(names) => names,
            GenreSelection::Fallback(candidates) => resolver
                .first_known_genre(&self.store, &candidates)
                .await?
                .into_iter()
                .collect(),
            GenreSelection::None => Vec::new(),
        };

        let outcome = EditionImporter::new(&self.store, &self.normalizer)
            .import(
                resolver,
                EditionImport {
                    book,
                    edition,
                    genre_names: &genre_names,
                },
            )
            .await?;

        // Another writer got there between the existence check and the insert
        if let ImportOutcome::Rejected(Rejection::AlreadyImported(edition)) = &outcome {
            debug!(%edition, "Edition imported concurrently, skipping");
            return Ok(RecordOutcome::Skipped);
        }

        Ok(RecordOutcome::Imported(outcome))
    }

    /// Sleep, waking early on shutdown.
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.wait() => debug!("Pause interrupted by shutdown"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::RunStatus;
    use crate::shutdown::ShutdownSignal;
    use crate::source::models::LanguageRef;
    use crate::source::MalformedRecord;
    use crate::store::MemoryCatalog;
    use crate::testing::{book, run_config, with_tags, ScriptedSource, Step};
    use std::sync::Arc;

    fn scraper(
        catalog: &MemoryCatalog,
        steps: Vec<Step>,
        config: RunConfig,
    ) -> (Scraper<MemoryCatalog, Arc<ScriptedSource>>, Arc<ScriptedSource>) {
        let shutdown = ShutdownSignal::shared();
        let source = Arc::new(ScriptedSource::new(shutdown.clone(), steps));
        (
            Scraper::new(catalog.clone(), source.clone(), config, shutdown),
            source,
        )
    }

    #[tokio::test]
    async fn test_pages_until_shutdown_and_records_progress() {
        let catalog = MemoryCatalog::new();
        let (scraper, source) = scraper(
            &catalog,
            vec![Step::Page(vec![book(1), book(2)]), Step::Page(vec![book(3)])],
            run_config(),
        );

        let summary = scraper.run().await.unwrap();

        assert_eq!(summary.exit, RunExit::Stopped);
        assert_eq!(summary.editions_imported, 3);
        assert_eq!(summary.authors_imported, 3);
        assert_eq!(source.requests(), vec![(2, 0), (2, 2), (2, 4)]);

        let run = &catalog.runs()[0];
        assert_eq!(run.status, RunStatus::Stopped);
        assert_eq!(run.last_offset, 4);
        assert_eq!(run.books_processed, 3);
        assert_eq!(run.editions_imported, 3);
        assert_eq!(run.last_hardcover_book_id, Some(3));
        assert_eq!(run.notes.as_deref(), Some("Gracefully stopped by signal"));
        assert_eq!(catalog.snapshot().books.len(), 3);
    }

    #[tokio::test]
    async fn test_completes_at_target_without_further_fetches() {
        let catalog = MemoryCatalog::new();
        let config = RunConfig {
            target_books: 2,
            ..run_config()
        };
        let (scraper, source) = scraper(
            &catalog,
            vec![
                Step::Page(vec![book(1), book(2)]),
                Step::Page(vec![book(3), book(4)]),
            ],
            config,
        );

        let summary = scraper.run().await.unwrap();

        assert_eq!(summary.exit, RunExit::Completed);
        assert_eq!(source.requests().len(), 1);
        let run = &catalog.runs()[0];
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.ended_at.is_some());
        assert_eq!(run.notes.as_deref(), Some("Successfully imported 2 books"));
    }

    #[tokio::test]
    async fn test_resumes_stopped_run_from_its_offset() {
        let catalog = MemoryCatalog::new();
        let stopped = catalog.seed_run(RunStatus::Stopped, 6, 3);
        let config = RunConfig {
            target_books: 4,
            ..run_config()
        };
        let (scraper, source) = scraper(&catalog, vec![Step::Page(vec![book(7)])], config);

        let summary = scraper.run().await.unwrap();

        assert!(summary.resumed);
        assert_eq!(summary.run_id, stopped);
        assert_eq!(source.requests()[0], (2, 6));
        // 3 from the earlier process plus 1 now reaches the target of 4
        assert_eq!(summary.exit, RunExit::Completed);
        let run = catalog.runs().into_iter().find(|r| r.id == stopped).unwrap();
        assert_eq!(run.editions_imported, 4);
        assert_eq!(catalog.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_page_does_not_advance_offset() {
        let catalog = MemoryCatalog::new();
        let (scraper, _source) = scraper(
            &catalog,
            vec![
                Step::Page(vec![book(1), book(2)]),
                Step::PageThenShutdown(vec![book(3), book(4)]),
            ],
            run_config(),
        );

        scraper.run().await.unwrap();

        let run = &catalog.runs()[0];
        assert_eq!(run.status, RunStatus::Stopped);
        assert_eq!(run.last_offset, 2);
        assert_eq!(catalog.snapshot().books.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_or_failed_page_restarts_from_zero() {
        let catalog = MemoryCatalog::new();
        let (scraper, source) = scraper(
            &catalog,
            vec![
                Step::Page(vec![book(1), book(2)]),
                Step::Fail,
                Step::Page(vec![book(1), book(2)]),
                Step::Page(Vec::new()),
            ],
            run_config(),
        );

        scraper.run().await.unwrap();

        let offsets: Vec<i64> = source.requests().iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 2, 0, 2, 0]);
        // Re-walked records are skipped, not re-imported
        assert_eq!(catalog.snapshot().books.len(), 2);
        assert_eq!(catalog.runs()[0].errors_count, 0);
    }

    #[tokio::test]
    async fn test_rejections_are_counted_and_logged() {
        let catalog = MemoryCatalog::new();
        let mut french = book(1);
        french.default_physical_edition.as_mut().unwrap().language = Some(LanguageRef {
            id: Some(2),
            language: Some("French".to_string()),
        });
        let mut untitled = book(2);
        untitled.default_physical_edition.as_mut().unwrap().title = None;
        let mut no_edition = book(3);
        no_edition.default_physical_edition = None;

        let (scraper, _source) = scraper(
            &catalog,
            vec![Step::Page(vec![french, untitled]), Step::Page(vec![no_edition])],
            run_config(),
        );

        let summary = scraper.run().await.unwrap();

        assert_eq!(summary.editions_imported, 0);
        assert_eq!(summary.errors_count, 2);
        assert_eq!(summary.books_processed, 3);

        let errors = catalog.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("Non-English"));
        assert_eq!(errors[0].category, ErrorCategory::Import);
        assert_eq!(errors[0].subject_id, Some(10));
        assert_eq!(errors[1].message, "Missing title");
    }

    #[tokio::test]
    async fn test_duplicate_identifier_is_counted_but_not_logged() {
        let catalog = MemoryCatalog::new();
        let mut reprint = book(2);
        reprint.default_physical_edition.as_mut().unwrap().isbn_13 =
            book(1).default_physical_edition.unwrap().isbn_13;

        let (scraper, _source) = scraper(
            &catalog,
            vec![Step::Page(vec![book(1), reprint])],
            run_config(),
        );

        let summary = scraper.run().await.unwrap();

        assert_eq!(summary.editions_imported, 1);
        assert_eq!(summary.errors_count, 1);
        assert!(catalog.errors().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_stall_the_page() {
        let catalog = MemoryCatalog::new();
        let malformed = MalformedRecord {
            book_id: Some(2),
            message: "invalid type: null, expected i64".to_string(),
        };
        let (scraper, source) = scraper(
            &catalog,
            vec![
                Step::Records(vec![Ok(book(1)), Err(malformed)]),
                Step::Page(vec![book(3)]),
            ],
            run_config(),
        );

        let summary = scraper.run().await.unwrap();

        assert_eq!(summary.books_processed, 3);
        assert_eq!(summary.editions_imported, 2);
        assert_eq!(summary.errors_count, 1);
        let offsets: Vec<i64> = source.requests().iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 2, 4]);

        let errors = catalog.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::Processing);
        assert_eq!(errors[0].subject, ErrorSubject::Book);
        assert_eq!(errors[0].subject_id, Some(2));
        assert!(errors[0].message.starts_with("Malformed book record"));
    }

    #[tokio::test]
    async fn test_edition_imported_concurrently_is_skipped() {
        let catalog = MemoryCatalog::new();
        catalog.stale_edition_check("10");
        // Same edition as book(1) under a different ISBN
        let mut reprint = book(2);
        reprint.default_physical_edition.as_mut().unwrap().id = 10;

        let (scraper, _source) = scraper(
            &catalog,
            vec![Step::Page(vec![book(1), reprint])],
            run_config(),
        );

        let summary = scraper.run().await.unwrap();

        assert_eq!(summary.books_processed, 2);
        assert_eq!(summary.editions_imported, 1);
        assert_eq!(summary.errors_count, 0);
        assert!(catalog.errors().is_empty());
        assert_eq!(catalog.snapshot().books.len(), 1);
    }

    #[tokio::test]
    async fn test_genre_fallback_links_first_known_candidate() {
        let catalog = MemoryCatalog::new();
        catalog.seed_genre("Drama");
        let config = RunConfig {
            genre_min_tag_count: 30,
            ..run_config()
        };
        let (scraper, _source) = scraper(
            &catalog,
            vec![Step::Page(vec![with_tags(
                book(1),
                &[("Fantasy", 5), ("Drama", 25)],
            )])],
            config,
        );

        scraper.run().await.unwrap();

        let snapshot = catalog.snapshot();
        let stored = snapshot.book_by_external(&ExternalRef::hardcover(10)).unwrap();
        assert_eq!(snapshot.genre_names_of(stored.id), vec!["Drama"]);
        assert_eq!(snapshot.genres.len(), 1);
    }

    #[tokio::test]
    async fn test_popular_genres_are_created() {
        let catalog = MemoryCatalog::new();
        let config = RunConfig {
            genre_min_tag_count: 20,
            ..run_config()
        };
        let (scraper, _source) = scraper(
            &catalog,
            vec![Step::Page(vec![with_tags(
                book(1),
                &[("Fantasy", 5), ("Drama", 25)],
            )])],
            config,
        );

        scraper.run().await.unwrap();

        let snapshot = catalog.snapshot();
        let stored = snapshot.book_by_external(&ExternalRef::hardcover(10)).unwrap();
        assert_eq!(snapshot.genre_names_of(stored.id), vec!["Drama"]);
    }

    #[tokio::test]
    async fn test_link_failure_is_logged_and_edition_kept() {
        let catalog = MemoryCatalog::new();
        catalog.fail_author_link("1001");
        let (scraper, _source) = scraper(&catalog, vec![Step::Page(vec![book(1)])], run_config());

        let summary = scraper.run().await.unwrap();

        assert_eq!(summary.editions_imported, 1);
        assert_eq!(summary.authors_imported, 0);
        assert_eq!(summary.errors_count, 0);
        let errors = catalog.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::Link);
    }

    #[tokio::test]
    async fn test_ledger_failure_fails_the_run() {
        let catalog = MemoryCatalog::new();
        catalog.fail_progress_updates();
        let (scraper, _source) = scraper(&catalog, vec![Step::Page(vec![book(1)])], run_config());

        let err = scraper.run().await.unwrap_err();
        assert!(err.to_string().contains("simulated failure"));

        let run = &catalog.runs()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.notes.as_deref().unwrap().starts_with("Fatal error:"));
        let errors = catalog.errors();
        assert_eq!(errors.last().unwrap().category, ErrorCategory::Fatal);
    }

    #[tokio::test]
    async fn test_second_run_imports_nothing_new() {
        let catalog = MemoryCatalog::new();
        let pages = || vec![Step::Page(vec![book(1), book(2)])];

        let (first, _) = scraper(&catalog, pages(), run_config());
        first.run().await.unwrap();
        let after_first = catalog.snapshot();

        let (second, _) = scraper(&catalog, pages(), run_config());
        let summary = second.run().await.unwrap();

        // Resumes at offset 2, where the source serves the same records again
        assert!(summary.resumed);
        assert_eq!(catalog.snapshot(), after_first);
    }
}
