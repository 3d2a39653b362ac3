//! Tome Common Library
//!
//! Shared types, logging setup, and error handling for the Tome backend
//! services.
//!
//! - **Error Handling**: [`TomeError`] and the [`Result`] alias
//! - **Logging**: [`logging::init_logging`] driven by [`logging::LogConfig`]
//! - **Types**: catalog identifiers shared by every service that stores books
//!
//! # Example
//!
//! ```no_run
//! use tome_common::types::{Isbn, IsbnKind};
//!
//! fn check(raw: &str) -> tome_common::Result<()> {
//!     let isbn = Isbn::parse(IsbnKind::Isbn13, raw)?;
//!     tracing::info!(isbn = %isbn, "valid ISBN");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Result, TomeError};
