//! Fixtures shared by unit tests

#![allow(clippy::unwrap_used)]

use crate::config::RunConfig;
use crate::shutdown::SharedShutdown;
use crate::source::models::{
    CandidateBook, CandidateEdition, Contribution, ContributorAuthor, LanguageRef,
};
use crate::source::{CachedTags, PageRecord, SourceClient, SourceError, TagCount};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) fn isbn13(n: i64) -> String {
    format!("978{n:010}")
}

pub(crate) fn contribution(id: i64, bio: Option<&str>) -> Contribution {
    Contribution {
        author: Some(ContributorAuthor {
            id,
            name: Some(format!("Author {id}")),
            bio: bio.map(str::to_string),
            born_year: None,
            death_year: None,
        }),
    }
}

/// An English work whose edition id is `id * 10` and whose single author
/// (id `id + 1000`) has a bio.
pub(crate) fn book(id: i64) -> CandidateBook {
    CandidateBook {
        id,
        title: Some(format!("Book {id}")),
        description: Some(format!("Description of book {id}")),
        default_physical_edition: Some(CandidateEdition {
            id: id * 10,
            title: Some(format!("Book {id}")),
            isbn_13: Some(isbn13(id)),
            pages: Some(200),
            language: Some(LanguageRef {
                id: Some(1),
                language: Some("English".to_string()),
            }),
            contributions: vec![contribution(id + 1000, Some("Writes books."))],
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn with_tags(mut book: CandidateBook, tags: &[(&str, i64)]) -> CandidateBook {
    book.cached_tags = CachedTags {
        genre: tags.iter().map(|(tag, count)| TagCount::new(*tag, *count)).collect(),
    };
    book
}

pub(crate) fn run_config() -> RunConfig {
    RunConfig {
        batch_size: 2,
        target_books: 100,
        genre_min_tag_count: 10,
        empty_page_cooldown_secs: 0,
        batch_delay_secs: 0,
    }
}

pub(crate) enum Step {
    Page(Vec<CandidateBook>),
    /// A page that may carry records which failed to decode
    Records(Vec<PageRecord>),
    /// Return the page, but request shutdown before it is processed.
    PageThenShutdown(Vec<CandidateBook>),
    Fail,
}

/// Serves scripted pages in order. Once the script runs out it requests
/// shutdown and returns empty pages.
pub(crate) struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<(i64, i64)>>,
    shutdown: SharedShutdown,
}

impl ScriptedSource {
    pub(crate) fn new(shutdown: SharedShutdown, steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// `(limit, offset)` of every fetch, in order
    pub(crate) fn requests(&self) -> Vec<(i64, i64)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<PageRecord>, SourceError> {
        self.requests.lock().unwrap().push((limit, offset));
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Page(books)) => Ok(books.into_iter().map(Ok).collect()),
            Some(Step::Records(records)) => Ok(records),
            Some(Step::PageThenShutdown(books)) => {
                self.shutdown.request();
                Ok(books.into_iter().map(Ok).collect())
            }
            Some(Step::Fail) => Err(SourceError::GraphQl("scripted failure".to_string())),
            None => {
                self.shutdown.request();
                Ok(Vec::new())
            }
        }
    }
}
