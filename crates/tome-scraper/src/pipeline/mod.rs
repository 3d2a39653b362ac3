//! Edition import pipeline
//!
//! [`RecordNormalizer`] validates candidates, [`ReferenceResolver`] maps
//! authors and genres to catalog ids, and [`EditionImporter`] writes one
//! edition per transaction.

mod importer;
mod normalizer;
mod resolver;

pub use importer::{EditionImport, EditionImporter, ImportOutcome, LinkFailure, LinkTarget};
pub use normalizer::{is_ignorable_reason, GenreSelection, RecordNormalizer, Rejection};
pub use resolver::ReferenceResolver;
