//! Scraper configuration
//!
//! Everything is read from the environment (a `.env` file is honoured).
//! The Hardcover API token is the only required value.

use std::time::Duration;

// ============================================================================
// Source Defaults
// ============================================================================

/// Hardcover GraphQL endpoint.
pub const DEFAULT_HARDCOVER_API_URL: &str = "https://api.hardcover.app/v1/graphql";

/// Hardcover allows 60 requests per minute per token.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Per-request HTTP timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Run Defaults
// ============================================================================

/// Stop once this many editions have been imported by a run.
pub const DEFAULT_TARGET_BOOKS_LIMIT: i64 = 5000;

/// Records requested per page.
pub const DEFAULT_BOOKS_PER_BATCH: i64 = 50;

/// Minimum tag count for a genre tag to be linked directly.
pub const DEFAULT_GENRE_MIN_TAG_COUNT: i64 = 10;

/// Pause after an empty or failed page before starting over at offset 0.
pub const DEFAULT_EMPTY_PAGE_COOLDOWN_SECS: u64 = 60;

/// Pause between pages.
pub const DEFAULT_BATCH_DELAY_SECS: u64 = 2;

// ============================================================================
// Database Defaults
// ============================================================================

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "tome";
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Full scraper configuration
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub source: SourceConfig,
    pub database: DatabaseConfig,
    pub run: RunConfig,
}

/// Hardcover API access
#[derive(Clone)]
pub struct SourceConfig {
    pub api_url: String,
    pub api_token: String,
    pub requests_per_minute: u32,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("api_url", &self.api_url)
            .field("api_token", &"<redacted>")
            .field("requests_per_minute", &self.requests_per_minute)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Postgres connection settings
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &redact_password(&self.url))
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Paging, stopping and pacing of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub batch_size: i64,
    pub target_books: i64,
    pub genre_min_tag_count: i64,
    pub empty_page_cooldown_secs: u64,
    pub batch_delay_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BOOKS_PER_BATCH,
            target_books: DEFAULT_TARGET_BOOKS_LIMIT,
            genre_min_tag_count: DEFAULT_GENRE_MIN_TAG_COUNT,
            empty_page_cooldown_secs: DEFAULT_EMPTY_PAGE_COOLDOWN_SECS,
            batch_delay_secs: DEFAULT_BATCH_DELAY_SECS,
        }
    }
}

impl RunConfig {
    pub fn empty_page_cooldown(&self) -> Duration {
        Duration::from_secs(self.empty_page_cooldown_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_secs)
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ScraperConfig {
    /// Load configuration from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            source: SourceConfig::from_env()?,
            database: DatabaseConfig::from_env(),
            run: RunConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source.api_token.trim().is_empty() {
            anyhow::bail!("HARDCOVER_API_TOKEN must not be empty");
        }
        if self.source.requests_per_minute == 0 {
            anyhow::bail!("REQUESTS_PER_MINUTE must be greater than 0");
        }
        if self.source.request_timeout_secs == 0 {
            anyhow::bail!("SCRAPER_REQUEST_TIMEOUT_SECS must be greater than 0");
        }
        if self.run.batch_size <= 0 {
            anyhow::bail!("BOOKS_PER_BATCH must be greater than 0");
        }
        if self.run.target_books <= 0 {
            anyhow::bail!("TARGET_BOOKS_LIMIT must be greater than 0");
        }
        if self.run.genre_min_tag_count < 0 {
            anyhow::bail!("GENRE_MIN_TAG_COUNT must not be negative");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        Ok(())
    }
}

impl SourceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_token = std::env::var("HARDCOVER_API_TOKEN")
            .map_err(|_| anyhow::anyhow!("HARDCOVER_API_TOKEN environment variable is required"))?;

        Ok(Self {
            api_url: std::env::var("HARDCOVER_API_URL")
                .unwrap_or_else(|_| DEFAULT_HARDCOVER_API_URL.to_string()),
            api_token,
            requests_per_minute: env_parse("REQUESTS_PER_MINUTE", DEFAULT_REQUESTS_PER_MINUTE),
            request_timeout_secs: env_parse(
                "SCRAPER_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            ),
        })
    }
}

impl DatabaseConfig {
    /// `DATABASE_URL` wins; otherwise the URL is assembled from `DB_*` parts.
    pub fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            let host = std::env::var("DB_HOST").unwrap_or_else(|_| DEFAULT_DB_HOST.to_string());
            let port = env_parse("DB_PORT", DEFAULT_DB_PORT);
            let name = std::env::var("DB_NAME").unwrap_or_else(|_| DEFAULT_DB_NAME.to_string());
            let user = std::env::var("DB_USER").unwrap_or_else(|_| DEFAULT_DB_USER.to_string());
            match std::env::var("DB_PASSWORD") {
                Ok(password) if !password.is_empty() => {
                    format!("postgres://{user}:{password}@{host}:{port}/{name}")
                }
                _ => format!("postgres://{user}@{host}:{port}/{name}"),
            }
        });

        Self {
            url,
            max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            ),
            connect_timeout_secs: env_parse(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            ),
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Self {
        Self {
            batch_size: env_parse("BOOKS_PER_BATCH", DEFAULT_BOOKS_PER_BATCH),
            target_books: env_parse("TARGET_BOOKS_LIMIT", DEFAULT_TARGET_BOOKS_LIMIT),
            genre_min_tag_count: env_parse("GENRE_MIN_TAG_COUNT", DEFAULT_GENRE_MIN_TAG_COUNT),
            empty_page_cooldown_secs: env_parse(
                "SCRAPER_EMPTY_PAGE_COOLDOWN_SECS",
                DEFAULT_EMPTY_PAGE_COOLDOWN_SECS,
            ),
            batch_delay_secs: env_parse("SCRAPER_BATCH_DELAY_SECS", DEFAULT_BATCH_DELAY_SECS),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn redact_password(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let credentials = &url[scheme_end + 3..at];
            match credentials.split_once(':') {
                Some((user, _)) => format!("{}{user}:***{}", &url[..scheme_end + 3], &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
