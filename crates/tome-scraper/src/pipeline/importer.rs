//! One edition, one transaction
//!
//! The book row is all-or-nothing. Each author and genre link runs inside
//! its own savepoint, so a failed link is rolled back and logged while the
//! book and the other links still commit.

use super::normalizer::{RecordNormalizer, Rejection};
use super::resolver::ReferenceResolver;
use crate::error::Result;
use crate::models::NormalizedEdition;
use crate::source::models::{CandidateBook, CandidateEdition};
use crate::store::{CatalogStore, CatalogTx, Savepoint, BOOK_PROVENANCE_CONSTRAINT};
use tome_common::types::ExternalRef;
use tracing::{debug, info, warn};

/// What to import: the edition, the work it belongs to and the genres
/// chosen for it.
#[derive(Debug, Clone, Copy)]
pub struct EditionImport<'a> {
    pub book: &'a CandidateBook,
    pub edition: &'a CandidateEdition,
    pub genre_names: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported {
        book_id: i64,
        authors_linked: i64,
        genres_linked: i64,
        link_failures: Vec<LinkFailure>,
    },
    Rejected(Rejection),
}

/// A link that was rolled back; the edition itself was imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    pub edition: ExternalRef,
    pub target: LinkTarget,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Author(ExternalRef),
    Genre(String),
}

impl std::fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            LinkTarget::Author(author) => write!(
                f,
                "Failed to link author {} to edition {}: {}",
                author, self.edition, self.message
            ),
            LinkTarget::Genre(name) => write!(
                f,
                "Failed to link genre '{}' to edition {}: {}",
                name, self.edition, self.message
            ),
        }
    }
}

pub struct EditionImporter<'a, S> {
    store: &'a S,
    normalizer: &'a RecordNormalizer,
}

impl<'a, S: CatalogStore> EditionImporter<'a, S> {
    pub fn new(store: &'a S, normalizer: &'a RecordNormalizer) -> Self {
        Self { store, normalizer }
    }

    /// Import one edition in its own transaction.
    ///
    /// Validation failures and a failed book insert come back as
    /// [`ImportOutcome::Rejected`] with nothing written. An `Err` means the
    /// transaction machinery itself failed; nothing is written in that case
    /// either.
    pub async fn import(
        &self,
        resolver: &mut ReferenceResolver,
        request: EditionImport<'_>,
    ) -> Result<ImportOutcome> {
        let mut tx = self.store.begin().await?;

        match self.import_in(&mut tx, resolver, request).await {
            Ok(outcome @ ImportOutcome::Imported { .. }) => {
                tx.commit().await.inspect_err(|_| resolver.discard_pending())?;
                resolver.commit_pending();
                Ok(outcome)
            }
            Ok(rejected) => {
                resolver.discard_pending();
                tx.rollback().await?;
                Ok(rejected)
            }
            Err(e) => {
                resolver.discard_pending();
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed import also failed");
                }
                Err(e)
            }
        }
    }

    async fn import_in(
        &self,
        tx: &mut S::Tx,
        resolver: &mut ReferenceResolver,
        request: EditionImport<'_>,
    ) -> Result<ImportOutcome> {
        let candidates = RecordNormalizer::candidate_isbns(request.edition);
        let taken = tx.existing_isbns(&candidates).await?;

        let edition = match self.normalizer.normalize(request.book, request.edition, &taken) {
            Ok(edition) => edition,
            Err(rejection) => {
                debug!(edition_id = request.edition.id, reason = %rejection, "Edition rejected");
                return Ok(ImportOutcome::Rejected(rejection));
            }
        };

        tx.savepoint(Savepoint::EditionInsert).await?;
        let book_id = match tx.insert_book(&edition).await {
            Ok(id) => id,
            Err(e) => {
                tx.rollback_to_savepoint(Savepoint::EditionInsert).await?;
                let rejection = if e.violated_constraint() == Some(BOOK_PROVENANCE_CONSTRAINT) {
                    Rejection::AlreadyImported(edition.external.clone())
                } else {
                    Rejection::Store {
                        edition: edition.external.clone(),
                        message: e.to_string(),
                    }
                };
                return Ok(ImportOutcome::Rejected(rejection));
            }
        };
        tx.release_savepoint(Savepoint::EditionInsert).await?;

        let mut link_failures = Vec::new();
        let authors_linked = self
            .link_authors(tx, resolver, &edition, book_id, &mut link_failures)
            .await?;
        let genres_linked = self
            .link_genres(tx, resolver, &edition, book_id, request.genre_names, &mut link_failures)
            .await?;

        info!(
            edition = %edition.external,
            book_id,
            title = %edition.title,
            authors_linked,
            genres_linked,
            "Imported edition"
        );

        Ok(ImportOutcome::Imported {
            book_id,
            authors_linked,
            genres_linked,
            link_failures,
        })
    }

    /// Link credited authors. Positions start at 1 and only advance when a
    /// new link row is written.
    async fn link_authors(
        &self,
        tx: &mut S::Tx,
        resolver: &mut ReferenceResolver,
        edition: &NormalizedEdition,
        book_id: i64,
        failures: &mut Vec<LinkFailure>,
    ) -> Result<i64> {
        let mut linked = 0;
        let mut order: i32 = 1;

        for author in edition.authors.iter().filter(|a| a.has_bio()) {
            tx.savepoint(Savepoint::AuthorLink).await?;

            let attempt: Result<Option<bool>> = async {
                match resolver.resolve_author(tx, author).await? {
                    Some(author_id) => tx.link_author(book_id, author_id, order).await.map(Some),
                    None => Ok(None),
                }
            }
            .await;

            match attempt {
                Ok(Some(true)) => {
                    tx.release_savepoint(Savepoint::AuthorLink).await?;
                    linked += 1;
                    order += 1;
                }
                Ok(Some(false) | None) => tx.release_savepoint(Savepoint::AuthorLink).await?,
                Err(e) => {
                    tx.rollback_to_savepoint(Savepoint::AuthorLink).await?;
                    tx.release_savepoint(Savepoint::AuthorLink).await?;
                    resolver.forget_pending_author(author);
                    let failure = LinkFailure {
                        edition: edition.external.clone(),
                        target: LinkTarget::Author(author.external.clone()),
                        message: e.to_string(),
                    };
                    warn!("{}", failure);
                    failures.push(failure);
                }
            }
        }

        Ok(linked)
    }

    async fn link_genres(
        &self,
        tx: &mut S::Tx,
        resolver: &mut ReferenceResolver,
        edition: &NormalizedEdition,
        book_id: i64,
        genre_names: &[String],
        failures: &mut Vec<LinkFailure>,
    ) -> Result<i64> {
        let mut linked = 0;

        for name in genre_names {
            tx.savepoint(Savepoint::GenreLink).await?;

            let attempt: Result<Option<bool>> = async {
                match resolver.resolve_genre(tx, name).await? {
                    Some(genre_id) => tx.link_genre(book_id, genre_id).await.map(Some),
                    None => Ok(None),
                }
            }
            .await;

            match attempt {
                Ok(Some(true)) => {
                    tx.release_savepoint(Savepoint::GenreLink).await?;
                    linked += 1;
                }
                Ok(Some(false) | None) => tx.release_savepoint(Savepoint::GenreLink).await?,
                Err(e) => {
                    tx.rollback_to_savepoint(Savepoint::GenreLink).await?;
                    tx.release_savepoint(Savepoint::GenreLink).await?;
                    resolver.forget_pending_genre(name);
                    let failure = LinkFailure {
                        edition: edition.external.clone(),
                        target: LinkTarget::Genre(name.clone()),
                        message: e.to_string(),
                    };
                    warn!("{}", failure);
                    failures.push(failure);
                }
            }
        }

        Ok(linked)
    }
}
