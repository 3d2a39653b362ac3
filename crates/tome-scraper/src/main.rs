//! Tome Scraper - Hardcover catalog importer

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tome_common::logging::{init_logging, LogConfig, LogLevel};
use tome_scraper::config::ScraperConfig;
use tome_scraper::shutdown::{listen_for_signals, ShutdownSignal};
use tome_scraper::source::HardcoverClient;
use tome_scraper::store::{MemoryCatalog, PgCatalog};
use tome_scraper::{RunSummary, Scraper};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tome-scraper")]
#[command(author, version, about = "Import popular books from Hardcover into the Tome catalog")]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Fetch and validate against an in-memory catalog; nothing is written to Postgres
    #[arg(long)]
    dry_run: bool,

    /// Do not apply database migrations on startup
    #[arg(long)]
    skip_migrations: bool,

    /// Override TARGET_BOOKS_LIMIT
    #[arg(long)]
    target: Option<i64>,

    /// Override BOOKS_PER_BATCH
    #[arg(long)]
    batch_size: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tome-scraper")
        .filter_directives("sqlx=warn,hyper=warn,reqwest=warn")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = ScraperConfig::from_env().context("Failed to load scraper configuration")?;
    if let Some(target) = cli.target {
        config.run.target_books = target;
    }
    if let Some(batch_size) = cli.batch_size {
        config.run.batch_size = batch_size;
    }
    config.validate()?;

    info!(
        api_url = %config.source.api_url,
        requests_per_minute = config.source.requests_per_minute,
        target = config.run.target_books,
        batch_size = config.run.batch_size,
        dry_run = cli.dry_run,
        "Starting Tome scraper"
    );

    let shutdown = ShutdownSignal::shared();
    tokio::spawn(listen_for_signals(shutdown.clone()));

    let source = HardcoverClient::new(&config.source)?;

    let summary = if cli.dry_run {
        warn!("Dry run: imports go to an in-memory catalog");
        Scraper::new(MemoryCatalog::new(), source, config.run.clone(), shutdown)
            .run()
            .await?
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(config.database.connect_timeout())
            .connect(&config.database.url)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection pool established");

        if cli.skip_migrations {
            info!("Skipping database migrations");
        } else {
            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;
            info!("Database migrations applied");
        }

        let catalog = PgCatalog::new(pool.clone());
        let summary = Scraper::new(catalog, source, config.run.clone(), shutdown)
            .run()
            .await?;
        pool.close().await;
        summary
    };

    report(&summary);
    Ok(())
}

fn report(summary: &RunSummary) {
    info!(
        run_id = summary.run_id,
        exit = ?summary.exit,
        resumed = summary.resumed,
        books_processed = summary.books_processed,
        editions_imported = summary.editions_imported,
        authors_imported = summary.authors_imported,
        errors = summary.errors_count,
        "Scraper finished"
    );
}
