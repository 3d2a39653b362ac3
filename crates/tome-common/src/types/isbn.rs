use crate::error::{Result, TomeError};
use serde::{Deserialize, Serialize};

/// The two ISBN slots a book row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsbnKind {
    Isbn10,
    Isbn13,
}

impl IsbnKind {
    pub fn code_len(self) -> usize {
        match self {
            IsbnKind::Isbn10 => 10,
            IsbnKind::Isbn13 => 13,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IsbnKind::Isbn10 => "ISBN-10",
            IsbnKind::Isbn13 => "ISBN-13",
        }
    }
}

/// A validated ISBN code: trimmed, exact length for its kind, ASCII digits only.
///
/// ISBN-10 check characters of `X` are not accepted; the catalog only stores
/// purely numeric codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Isbn {
    kind: IsbnKind,
    code: String,
}

impl Isbn {
    pub fn parse(kind: IsbnKind, raw: &str) -> Result<Self> {
        let code = raw.trim();
        if code.len() != kind.code_len() || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TomeError::InvalidIdentifier {
                kind: kind.label(),
                value: raw.to_string(),
            });
        }
        Ok(Self {
            kind,
            code: code.to_string(),
        })
    }

    /// Lenient variant for imported data: anything invalid counts as absent.
    pub fn accept(kind: IsbnKind, raw: Option<&str>) -> Option<Self> {
        raw.and_then(|r| Self::parse(kind, r).ok())
    }

    pub fn kind(&self) -> IsbnKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }
}

impl std::fmt::Display for Isbn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}
