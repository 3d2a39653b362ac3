//! Postgres-backed catalog store

use super::{CatalogStore, CatalogTx, NewAuthor, Savepoint};
use crate::error::{Result, ScraperError};
use crate::models::{NormalizedEdition, RunProgress, RunStatus, ScraperErrorRecord, ScraperRun};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tome_common::types::{ExternalRef, Isbn, IsbnKind};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    status: String,
    last_offset: i64,
    last_hardcover_book_id: Option<i64>,
    books_processed: i64,
    editions_imported: i64,
    authors_imported: i64,
    errors_count: i64,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    notes: Option<String>,
}

impl From<RunRow> for ScraperRun {
    fn from(row: RunRow) -> Self {
        Self {
            id: row.id,
            status: RunStatus::from(row.status),
            last_offset: row.last_offset,
            last_hardcover_book_id: row.last_hardcover_book_id,
            books_processed: row.books_processed,
            editions_imported: row.editions_imported,
            authors_imported: row.authors_imported,
            errors_count: row.errors_count,
            started_at: row.started_at,
            ended_at: row.ended_at,
            notes: row.notes,
        }
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    type Tx = PgCatalogTx;

    async fn begin(&self) -> Result<PgCatalogTx> {
        Ok(PgCatalogTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn find_resumable_run(&self) -> Result<Option<ScraperRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, status, last_offset, last_hardcover_book_id, books_processed,
                   editions_imported, authors_imported, errors_count, started_at,
                   ended_at, notes
            FROM scraper_runs
            WHERE status IN ('running', 'stopped')
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ScraperRun::from))
    }

    async fn create_run(&self) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO scraper_runs (status, last_offset, started_at)
            VALUES ('running', 0, NOW())
            RETURNING id
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn reopen_run(&self, run_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE scraper_runs SET status = 'running', started_at = NOW(), ended_at = NULL WHERE id = $1",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScraperError::Ledger(format!("Run {run_id} not found")));
        }
        Ok(())
    }

    #[instrument(skip(self, progress))]
    async fn record_progress(&self, run_id: i64, progress: &RunProgress) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE scraper_runs
            SET books_processed = books_processed + $2,
                editions_imported = editions_imported + $3,
                authors_imported = authors_imported + $4,
                errors_count = errors_count + $5,
                last_hardcover_book_id = COALESCE($6, last_hardcover_book_id),
                last_offset = COALESCE($7, last_offset)
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(progress.books_processed)
        .bind(progress.editions_imported)
        .bind(progress.authors_imported)
        .bind(progress.errors_count)
        .bind(progress.last_hardcover_book_id)
        .bind(progress.last_offset)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScraperError::Ledger(format!("Run {run_id} not found")));
        }
        Ok(())
    }

    async fn close_run(&self, run_id: i64, status: RunStatus, notes: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE scraper_runs
            SET status = $2,
                ended_at = CASE WHEN $2 = 'running' THEN NULL ELSE NOW() END,
                notes = COALESCE($3, notes)
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(notes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScraperError::Ledger(format!("Run {run_id} not found")));
        }
        Ok(())
    }

    async fn insert_error(&self, record: &ScraperErrorRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scraper_errors
                (scraper_run_id, error_type, hardcover_id, hardcover_type, error_message, stack_trace)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.run_id)
        .bind(record.category.as_str())
        .bind(record.subject_id)
        .bind(record.subject.as_str())
        .bind(&record.message)
        .bind(record.detail.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn edition_exists(&self, external: &ExternalRef) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM books WHERE external_source = $1 AND external_id = $2)",
        )
        .bind(external.source.as_str())
        .bind(&external.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn genre_exists(&self, name: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM genres WHERE LOWER(name) = LOWER($1))",
        )
        .bind(name.trim())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

/// Open Postgres import transaction. Dropping it without committing rolls back.
pub struct PgCatalogTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTx for PgCatalogTx {
    async fn savepoint(&mut self, savepoint: Savepoint) -> Result<()> {
        let sql = format!("SAVEPOINT {}", savepoint.as_str());
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, savepoint: Savepoint) -> Result<()> {
        let sql = format!("RELEASE SAVEPOINT {}", savepoint.as_str());
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, savepoint: Savepoint) -> Result<()> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", savepoint.as_str());
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn existing_isbns(&mut self, isbns: &[Isbn]) -> Result<Vec<Isbn>> {
        let mut found = Vec::new();
        for isbn in isbns {
            let sql = match isbn.kind() {
                IsbnKind::Isbn10 => "SELECT EXISTS(SELECT 1 FROM books WHERE isbn_10 = $1)",
                IsbnKind::Isbn13 => "SELECT EXISTS(SELECT 1 FROM books WHERE isbn_13 = $1)",
            };
            let exists = sqlx::query_scalar::<_, bool>(sql)
                .bind(isbn.as_str())
                .fetch_one(&mut *self.tx)
                .await?;
            if exists {
                found.push(isbn.clone());
            }
        }
        Ok(found)
    }

    #[instrument(skip(self, edition), fields(external = %edition.external))]
    async fn insert_book(&mut self, edition: &NormalizedEdition) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO books (
                title, subtitle, isbn_10, isbn_13, publisher, published_date,
                page_count, description, language, audio_seconds, ebook_page_count,
                external_source, external_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(&edition.title)
        .bind(edition.subtitle.as_deref())
        .bind(edition.isbn_10.as_ref().map(Isbn::as_str))
        .bind(edition.isbn_13.as_ref().map(Isbn::as_str))
        .bind(edition.publisher.as_deref())
        .bind(edition.published_date)
        .bind(edition.page_count)
        .bind(edition.description.as_deref())
        .bind(edition.language)
        .bind(edition.audio_seconds)
        .bind(edition.ebook_page_count)
        .bind(edition.external.source.as_str())
        .bind(&edition.external.id)
        .fetch_one(&mut *self.tx)
        .await?;

        debug!(book_id = id, "Inserted book");
        Ok(id)
    }

    async fn find_author(&mut self, external: &ExternalRef) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM authors WHERE external_source = $1 AND external_id = $2",
        )
        .bind(external.source.as_str())
        .bind(&external.id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn insert_author(&mut self, author: &NewAuthor<'_>) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO authors (name, bio, birth_year, death_year, external_source, external_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id
            "#,
        )
        .bind(author.name)
        .bind(author.bio)
        .bind(author.birth_year)
        .bind(author.death_year)
        .bind(author.external.source.as_str())
        .bind(&author.external.id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn find_genre(&mut self, name: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM genres WHERE LOWER(name) = LOWER($1) ORDER BY id LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn insert_genre(&mut self, name: &str) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO genres (name, created_at) VALUES ($1, NOW()) RETURNING id",
        )
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn link_author(&mut self, book_id: i64, author_id: i64, order: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO book_authors (book_id, author_id, author_order)
            VALUES ($1, $2, $3)
            ON CONFLICT (book_id, author_id) DO NOTHING
            "#,
        )
        .bind(book_id)
        .bind(author_id)
        .bind(order)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn link_genre(&mut self, book_id: i64, genre_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO book_genres (book_id, genre_id)
            VALUES ($1, $2)
            ON CONFLICT (book_id, genre_id) DO NOTHING
            "#,
        )
        .bind(book_id)
        .bind(genre_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
