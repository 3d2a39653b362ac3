//! GraphQL client for the Hardcover API

use super::models::{decode_record, PageRecord};
use super::rate_gate::RateGate;
use super::{SourceClient, SourceError};
use crate::config::SourceConfig;
use crate::error::{Result, ScraperError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

/// Books ordered by reader count, with the default edition of each format.
pub const BOOKS_QUERY: &str = r#"
query GetPopularBooks($limit: Int!, $offset: Int!) {
  books(
    limit: $limit
    offset: $offset
    order_by: { users_count: desc }
  ) {
    id
    title
    slug
    cached_tags
    description
    default_physical_edition {
      id
      title
      subtitle
      isbn_10
      isbn_13
      pages
      release_date
      release_year
      book_id
      publisher { id name }
      language { id language }
      contributions {
        author { id name bio born_year death_year }
      }
    }
    default_audio_edition { id audio_seconds }
    default_ebook_edition { id pages }
  }
}
"#;

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<BooksData>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct BooksData {
    #[serde(default)]
    books: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Rate-limited Hardcover API client
pub struct HardcoverClient {
    client: Client,
    api_url: String,
    rate_gate: RateGate,
}

impl HardcoverClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_token.trim()))
            .map_err(|e| ScraperError::Config(format!("Invalid API token: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("tome-scraper/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            rate_gate: RateGate::per_minute(config.requests_per_minute),
        })
    }
}

#[async_trait]
impl SourceClient for HardcoverClient {
    #[instrument(skip(self))]
    async fn fetch_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> std::result::Result<Vec<PageRecord>, SourceError> {
        self.rate_gate.wait().await;

        let request = GraphQlRequest {
            query: BOOKS_QUERY,
            variables: json!({ "limit": limit, "offset": offset }),
        };

        let response = self.client.post(&self.api_url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: GraphQlResponse = response.json().await?;

        if let Some(errors) = payload.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(SourceError::GraphQl(messages.join("; ")));
        }

        let records: Vec<PageRecord> = payload
            .data
            .ok_or(SourceError::MissingData)?
            .books
            .into_iter()
            .map(decode_record)
            .collect();
        debug!(
            count = records.len(),
            malformed = records.iter().filter(|r| r.is_err()).count(),
            "Fetched books page"
        );
        Ok(records)
    }
}
