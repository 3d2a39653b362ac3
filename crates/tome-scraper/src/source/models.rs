//! Hardcover GraphQL response shapes
//!
//! Every field the catalog can live without is optional, and explicit `null`s
//! are accepted wherever a default makes sense. Validation happens later in
//! the normalizer, not at decode time.
//!
//! Pages are decoded one record at a time, so a single record with a bad id
//! only costs that record.

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// One entry of a fetched page
pub type PageRecord = Result<CandidateBook, MalformedRecord>;

/// A page entry that did not decode into a [`CandidateBook`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed book record: {message}")]
pub struct MalformedRecord {
    /// The record's own id, when that much was readable
    pub book_id: Option<i64>,
    pub message: String,
}

/// Decode one raw `books` entry.
pub fn decode_record(value: serde_json::Value) -> PageRecord {
    let book_id = value.get("id").and_then(serde_json::Value::as_i64);
    serde_json::from_value(value).map_err(|e| MalformedRecord {
        book_id,
        message: e.to_string(),
    })
}

/// One work from the `books` query, with its default editions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateBook {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub cached_tags: CachedTags,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_physical_edition: Option<CandidateEdition>,
    #[serde(default)]
    pub default_audio_edition: Option<AudioEditionSummary>,
    #[serde(default)]
    pub default_ebook_edition: Option<EbookEditionSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateEdition {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub isbn_10: Option<String>,
    #[serde(default)]
    pub isbn_13: Option<String>,
    #[serde(default)]
    pub pages: Option<i64>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub book_id: Option<i64>,
    #[serde(default)]
    pub publisher: Option<PublisherRef>,
    #[serde(default)]
    pub language: Option<LanguageRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contributions: Vec<Contribution>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublisherRef {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageRef {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Contribution {
    #[serde(default)]
    pub author: Option<ContributorAuthor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContributorAuthor {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub born_year: Option<i32>,
    #[serde(default)]
    pub death_year: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioEditionSummary {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub audio_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EbookEditionSummary {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub pages: Option<i64>,
}

/// Hardcover's precomputed tag summary, grouped by tag category.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CachedTags {
    #[serde(rename = "Genre", default, deserialize_with = "null_as_default")]
    pub genre: Vec<TagCount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagCount {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub count: Option<i64>,
}

impl TagCount {
    pub fn new(tag: impl Into<String>, count: i64) -> Self {
        Self {
            tag: Some(tag.into()),
            count: Some(count),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `cached_tags` is free-form JSON upstream; anything that does not look like
/// a tag summary is treated as "no tags" rather than failing the whole page.
fn lenient_tags<'de, D>(deserializer: D) -> Result<CachedTags, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}
