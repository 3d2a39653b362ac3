//! Author and genre resolution with a process-lifetime id cache
//!
//! Ids created inside an open transaction are held as pending until the
//! transaction commits. A rollback (full or to a savepoint) discards them, so
//! the cache never hands out an id whose row was rolled back.

use crate::error::Result;
use crate::models::AuthorCandidate;
use crate::store::{CatalogStore, CatalogTx, NewAuthor};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ReferenceResolver {
    authors: HashMap<String, i64>,
    genres: HashMap<String, i64>,
    pending_authors: HashMap<String, i64>,
    pending_genres: HashMap<String, i64>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the author, creating the row if needed.
    ///
    /// Returns `None` without touching the catalog when the author has no
    /// biography or no name.
    pub async fn resolve_author<T: CatalogTx>(
        &mut self,
        tx: &mut T,
        author: &AuthorCandidate,
    ) -> Result<Option<i64>> {
        if !author.has_bio() || author.name.is_empty() {
            debug!(author = %author.external, "Skipping author without bio");
            return Ok(None);
        }

        let key = author.external.to_string();
        if let Some(id) = self.authors.get(&key).or_else(|| self.pending_authors.get(&key)) {
            return Ok(Some(*id));
        }

        if let Some(id) = tx.find_author(&author.external).await? {
            self.authors.insert(key, id);
            return Ok(Some(id));
        }

        let id = tx
            .insert_author(&NewAuthor {
                external: &author.external,
                name: &author.name,
                bio: author.bio.as_deref().unwrap_or_default().trim(),
                birth_year: author.birth_year,
                death_year: author.death_year,
            })
            .await?;
        debug!(author = %author.external, author_id = id, "Created author");
        self.pending_authors.insert(key, id);
        Ok(Some(id))
    }

    /// Id of the genre (matched case-insensitively), creating it if needed.
    pub async fn resolve_genre<T: CatalogTx>(
        &mut self,
        tx: &mut T,
        name: &str,
    ) -> Result<Option<i64>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let key = name.to_lowercase();
        if let Some(id) = self.genres.get(&key).or_else(|| self.pending_genres.get(&key)) {
            return Ok(Some(*id));
        }

        if let Some(id) = tx.find_genre(name).await? {
            self.genres.insert(key, id);
            return Ok(Some(id));
        }

        let id = tx.insert_genre(name).await?;
        debug!(genre = name, genre_id = id, "Created genre");
        self.pending_genres.insert(key, id);
        Ok(Some(id))
    }

    /// First candidate that already exists in the catalog, in order.
    pub async fn first_known_genre<S: CatalogStore>(
        &self,
        store: &S,
        candidates: &[String],
    ) -> Result<Option<String>> {
        for name in candidates {
            if self.genres.contains_key(&name.trim().to_lowercase())
                || store.genre_exists(name).await?
            {
                return Ok(Some(name.clone()));
            }
        }
        Ok(None)
    }

    /// The transaction committed: pending ids are now durable.
    pub fn commit_pending(&mut self) {
        self.authors.extend(self.pending_authors.drain());
        self.genres.extend(self.pending_genres.drain());
    }

    /// The transaction rolled back: forget everything it created.
    pub fn discard_pending(&mut self) {
        self.pending_authors.clear();
        self.pending_genres.clear();
    }

    /// A savepoint around this author rolled back.
    pub fn forget_pending_author(&mut self, author: &AuthorCandidate) {
        self.pending_authors.remove(&author.external.to_string());
    }

    /// A savepoint around this genre rolled back.
    pub fn forget_pending_genre(&mut self, name: &str) {
        self.pending_genres.remove(&name.trim().to_lowercase());
    }

    pub fn cached_authors(&self) -> usize {
        self.authors.len()
    }

    pub fn cached_genres(&self) -> usize {
        self.genres.len()
    }
}
