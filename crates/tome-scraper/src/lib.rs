//! Tome Scraper
//!
//! Imports popular books from the Hardcover GraphQL API into the Tome
//! Postgres catalog.
//!
//! Each record's default physical edition is validated, written in its own
//! transaction together with its authors and genres, and progress is kept in
//! a durable run ledger so an interrupted run picks up where it stopped.
//!
//! # Example
//!
//! ```no_run
//! use tome_scraper::config::ScraperConfig;
//! use tome_scraper::shutdown::ShutdownSignal;
//! use tome_scraper::source::HardcoverClient;
//! use tome_scraper::store::PgCatalog;
//! use tome_scraper::Scraper;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ScraperConfig::from_env()?;
//!     let pool = sqlx::PgPool::connect(&config.database.url).await?;
//!     let source = HardcoverClient::new(&config.source)?;
//!     let shutdown = ShutdownSignal::shared();
//!     let scraper = Scraper::new(PgCatalog::new(pool), source, config.run, shutdown);
//!     let summary = scraper.run().await?;
//!     println!("imported {} editions", summary.editions_imported);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod shutdown;
pub mod source;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Result, ScraperError};
pub use scraper::{RunExit, RunSummary, Scraper};
