//! Candidate edition validation and normalization
//!
//! Pure functions: the only catalog state they see is the set of ISBNs the
//! importer has already found taken.

use crate::models::{AuthorCandidate, NormalizedEdition, CATALOG_LANGUAGE};
use crate::source::models::{CachedTags, CandidateBook, CandidateEdition};
use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;
use tome_common::types::{ExternalRef, Isbn, IsbnKind};

/// Why an edition was not imported.
///
/// The display text is what ends up in the error log, and
/// [`Rejection::is_ignorable`] classifies on that text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Missing title")]
    MissingTitle,

    #[error("Missing or invalid identifiers")]
    InvalidIdentifiers,

    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(Isbn),

    #[error("Non-English language: {0}")]
    NonEnglish(String),

    #[error("Edition {0} already imported")]
    AlreadyImported(ExternalRef),

    #[error("Error importing edition {edition}: {message}")]
    Store { edition: ExternalRef, message: String },
}

impl Rejection {
    /// Duplicates and re-imports are expected while re-walking the source,
    /// so they are counted but not written to the error log.
    pub fn is_ignorable(&self) -> bool {
        is_ignorable_reason(&self.to_string())
    }
}

/// Case-insensitive check for the reasons that mean "already have it".
pub fn is_ignorable_reason(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    ["duplicate", "already exists", "already imported"]
        .iter()
        .any(|needle| reason.contains(needle))
}

/// Outcome of genre tag selection for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenreSelection {
    /// Tags at or above the threshold, in source order; all get linked.
    Popular(Vec<String>),
    /// Nothing reached the threshold. At most one of these, the first that
    /// already exists in the catalog, gets linked.
    Fallback(Vec<String>),
    None,
}

#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    genre_min_tag_count: i64,
}

impl RecordNormalizer {
    pub fn new(genre_min_tag_count: i64) -> Self {
        Self {
            genre_min_tag_count,
        }
    }

    /// The edition's well-formed ISBNs, ISBN-10 first.
    pub fn candidate_isbns(edition: &CandidateEdition) -> Vec<Isbn> {
        [
            Isbn::accept(IsbnKind::Isbn10, edition.isbn_10.as_deref()),
            Isbn::accept(IsbnKind::Isbn13, edition.isbn_13.as_deref()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Validate and normalize one edition.
    ///
    /// Checks run in a fixed order and the first failure wins: title,
    /// identifiers, duplicates, language. Optional fields never reject.
    pub fn normalize(
        &self,
        book: &CandidateBook,
        edition: &CandidateEdition,
        taken_isbns: &[Isbn],
    ) -> Result<NormalizedEdition, Rejection> {
        let title = non_blank(edition.title.as_deref()).ok_or(Rejection::MissingTitle)?;

        let isbn_10 = Isbn::accept(IsbnKind::Isbn10, edition.isbn_10.as_deref());
        let isbn_13 = Isbn::accept(IsbnKind::Isbn13, edition.isbn_13.as_deref());
        if isbn_10.is_none() && isbn_13.is_none() {
            return Err(Rejection::InvalidIdentifiers);
        }

        for isbn in isbn_10.iter().chain(isbn_13.iter()) {
            if taken_isbns.contains(isbn) {
                return Err(Rejection::DuplicateIdentifier(isbn.clone()));
            }
        }

        if let Some(label) = edition
            .language
            .as_ref()
            .and_then(|l| non_blank(l.language.as_deref()))
        {
            let lowered = label.to_lowercase();
            if lowered != "english" && lowered != "en" {
                return Err(Rejection::NonEnglish(label));
            }
        }

        Ok(NormalizedEdition {
            external: ExternalRef::hardcover(edition.id),
            title,
            subtitle: non_blank(edition.subtitle.as_deref()),
            isbn_10,
            isbn_13,
            publisher: edition
                .publisher
                .as_ref()
                .and_then(|p| non_blank(p.name.as_deref())),
            published_date: edition
                .release_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
            page_count: positive(edition.pages),
            description: non_blank(book.description.as_deref()),
            language: CATALOG_LANGUAGE,
            audio_seconds: book
                .default_audio_edition
                .as_ref()
                .and_then(|a| positive(a.audio_seconds)),
            ebook_page_count: book
                .default_ebook_edition
                .as_ref()
                .and_then(|e| positive(e.pages)),
            authors: authors_of(edition),
        })
    }

    pub fn select_genres(&self, tags: &CachedTags) -> GenreSelection {
        let mut seen = HashSet::new();
        let tagged: Vec<(String, i64)> = tags
            .genre
            .iter()
            .filter_map(|t| Some((non_blank(t.tag.as_deref())?, t.count.unwrap_or(0))))
            .filter(|(name, _)| seen.insert(name.to_lowercase()))
            .collect();

        let popular: Vec<String> = tagged
            .iter()
            .filter(|(_, count)| *count >= self.genre_min_tag_count)
            .map(|(name, _)| name.clone())
            .collect();

        if !popular.is_empty() {
            GenreSelection::Popular(popular)
        } else if !tagged.is_empty() {
            GenreSelection::Fallback(tagged.into_iter().map(|(name, _)| name).collect())
        } else {
            GenreSelection::None
        }
    }
}

/// Credited authors in contribution order, each at most once.
fn authors_of(edition: &CandidateEdition) -> Vec<AuthorCandidate> {
    let mut seen = HashSet::new();
    edition
        .contributions
        .iter()
        .filter_map(|c| c.author.as_ref())
        .filter(|a| seen.insert(a.id))
        .map(|a| AuthorCandidate {
            external: ExternalRef::hardcover(a.id),
            name: a.name.as_deref().map(str::trim).unwrap_or_default().to_string(),
            bio: non_blank(a.bio.as_deref()),
            birth_year: a.born_year,
            death_year: a.death_year,
        })
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn positive(value: Option<i64>) -> Option<i32> {
    value
        .filter(|v| *v > 0)
        .and_then(|v| i32::try_from(v).ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::models::{
        AudioEditionSummary, Contribution, ContributorAuthor, LanguageRef, PublisherRef, TagCount,
    };

    fn edition() -> CandidateEdition {
        CandidateEdition {
            id: 100,
            title: Some("  The Left Hand of Darkness ".to_string()),
            isbn_10: Some("0441478123".to_string()),
            isbn_13: Some("9780441478125".to_string()),
            pages: Some(304),
            release_date: Some("1987-03-15".to_string()),
            publisher: Some(PublisherRef {
                id: Some(1),
                name: Some("Ace".to_string()),
            }),
            language: Some(LanguageRef {
                id: Some(1),
                language: Some("English".to_string()),
            }),
            contributions: vec![Contribution {
                author: Some(ContributorAuthor {
                    id: 7,
                    name: Some("Ursula K. Le Guin".to_string()),
                    bio: Some("American author.".to_string()),
                    born_year: Some(1929),
                    death_year: Some(2018),
                }),
            }],
            ..Default::default()
        }
    }

    fn book() -> CandidateBook {
        CandidateBook {
            id: 1,
            description: Some("A story of Gethen.".to_string()),
            ..Default::default()
        }
    }

    fn normalizer() -> RecordNormalizer {
        RecordNormalizer::new(10)
    }

    #[test]
    fn test_normalizes_full_edition() {
        let normalized = normalizer().normalize(&book(), &edition(), &[]).unwrap();

        assert_eq!(normalized.external, ExternalRef::hardcover(100));
        assert_eq!(normalized.title, "The Left Hand of Darkness");
        assert_eq!(normalized.isbn_13.unwrap().as_str(), "9780441478125");
        assert_eq!(normalized.publisher.as_deref(), Some("Ace"));
        assert_eq!(
            normalized.published_date,
            NaiveDate::from_ymd_opt(1987, 3, 15)
        );
        assert_eq!(normalized.page_count, Some(304));
        assert_eq!(normalized.language, "en");
        assert_eq!(normalized.description.as_deref(), Some("A story of Gethen."));
        assert_eq!(normalized.authors.len(), 1);
        assert_eq!(normalized.authors[0].external.id, "7");
    }

    #[test]
    fn test_missing_title_rejected() {
        let mut e = edition();
        e.title = Some("   ".to_string());
        assert_eq!(
            normalizer().normalize(&book(), &e, &[]),
            Err(Rejection::MissingTitle)
        );
    }

    #[test]
    fn test_title_checked_before_identifiers() {
        let mut e = edition();
        e.title = None;
        e.isbn_10 = None;
        e.isbn_13 = None;
        assert_eq!(
            normalizer().normalize(&book(), &e, &[]),
            Err(Rejection::MissingTitle)
        );
    }

    #[test]
    fn test_malformed_isbns_count_as_absent() {
        let mut e = edition();
        e.isbn_10 = Some("123456789".to_string());
        e.isbn_13 = Some("978044147812X".to_string());
        assert_eq!(
            normalizer().normalize(&book(), &e, &[]),
            Err(Rejection::InvalidIdentifiers)
        );

        e.isbn_10 = Some("1234567890".to_string());
        let normalized = normalizer().normalize(&book(), &e, &[]).unwrap();
        assert_eq!(normalized.isbn_10.unwrap().as_str(), "1234567890");
        assert!(normalized.isbn_13.is_none());
    }

    #[test]
    fn test_taken_isbn_is_duplicate() {
        let e = edition();
        let taken = vec![Isbn::parse(IsbnKind::Isbn13, "9780441478125").unwrap()];
        let rejection = normalizer().normalize(&book(), &e, &taken).unwrap_err();
        assert_eq!(rejection.to_string(), "Duplicate identifier: 9780441478125");
        assert!(rejection.is_ignorable());
    }

    #[test]
    fn test_duplicate_checked_before_language() {
        let mut e = edition();
        e.language = Some(LanguageRef {
            id: None,
            language: Some("French".to_string()),
        });
        let taken = RecordNormalizer::candidate_isbns(&e);
        assert!(matches!(
            normalizer().normalize(&book(), &e, &taken),
            Err(Rejection::DuplicateIdentifier(_))
        ));
    }

    #[test]
    fn test_non_english_rejected() {
        let mut e = edition();
        e.language = Some(LanguageRef {
            id: Some(2),
            language: Some("French".to_string()),
        });
        let rejection = normalizer().normalize(&book(), &e, &[]).unwrap_err();
        assert!(rejection.to_string().contains("Non-English"));
        assert!(!rejection.is_ignorable());
    }

    #[test]
    fn test_language_accepted_when_absent_or_english() {
        for label in [None, Some(""), Some("EN"), Some("english")] {
            let mut e = edition();
            e.language = Some(LanguageRef {
                id: None,
                language: label.map(str::to_string),
            });
            assert!(normalizer().normalize(&book(), &e, &[]).is_ok(), "{label:?}");
        }
        let mut e = edition();
        e.language = None;
        assert!(normalizer().normalize(&book(), &e, &[]).is_ok());
    }

    #[test]
    fn test_optional_fields_degrade_to_absent() {
        let mut e = edition();
        e.pages = Some(0);
        e.subtitle = Some(" ".to_string());
        e.release_date = Some("sometime".to_string());
        e.publisher = None;
        let mut b = book();
        b.description = Some("".to_string());
        b.default_audio_edition = Some(AudioEditionSummary {
            id: Some(5),
            audio_seconds: Some(-3),
        });

        let normalized = normalizer().normalize(&b, &e, &[]).unwrap();
        assert_eq!(normalized.page_count, None);
        assert_eq!(normalized.subtitle, None);
        assert_eq!(normalized.published_date, None);
        assert_eq!(normalized.publisher, None);
        assert_eq!(normalized.description, None);
        assert_eq!(normalized.audio_seconds, None);
    }

    #[test]
    fn test_repeated_author_credited_once() {
        let mut e = edition();
        let again = e.contributions[0].clone();
        e.contributions.push(again);
        e.contributions.push(Contribution { author: None });
        let normalized = normalizer().normalize(&book(), &e, &[]).unwrap();
        assert_eq!(normalized.authors.len(), 1);
    }

    #[test]
    fn test_genre_threshold() {
        let tags = CachedTags {
            genre: vec![TagCount::new("Fantasy", 5), TagCount::new("Drama", 25)],
        };

        assert_eq!(
            RecordNormalizer::new(20).select_genres(&tags),
            GenreSelection::Popular(vec!["Drama".to_string()])
        );
        assert_eq!(
            RecordNormalizer::new(30).select_genres(&tags),
            GenreSelection::Fallback(vec!["Fantasy".to_string(), "Drama".to_string()])
        );
        assert_eq!(
            RecordNormalizer::new(30).select_genres(&CachedTags::default()),
            GenreSelection::None
        );
    }

    #[test]
    fn test_genre_count_equal_to_threshold_is_popular() {
        let tags = CachedTags {
            genre: vec![TagCount::new("Horror", 10), TagCount::new("horror", 50)],
        };
        assert_eq!(
            normalizer().select_genres(&tags),
            GenreSelection::Popular(vec!["Horror".to_string()])
        );
    }

    #[test]
    fn test_ignorable_reasons() {
        assert!(is_ignorable_reason("DUPLICATE key value"));
        assert!(is_ignorable_reason("Genre already exists"));
        assert!(is_ignorable_reason("Edition hardcover:4 already imported"));
        assert!(!is_ignorable_reason("Missing title"));
    }
}
