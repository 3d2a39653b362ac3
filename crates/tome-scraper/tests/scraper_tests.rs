//! End-to-end runs: mock Hardcover endpoint, in-memory catalog

use serde_json::json;
use tome_common::types::ExternalRef;
use tome_scraper::config::{RunConfig, SourceConfig};
use tome_scraper::models::{ErrorCategory, RunStatus};
use tome_scraper::shutdown::ShutdownSignal;
use tome_scraper::source::HardcoverClient;
use tome_scraper::store::MemoryCatalog;
use tome_scraper::{RunExit, Scraper};
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn run_config(target_books: i64) -> RunConfig {
    RunConfig {
        batch_size: 2,
        target_books,
        genre_min_tag_count: 10,
        empty_page_cooldown_secs: 0,
        batch_delay_secs: 0,
    }
}

fn client(server: &MockServer) -> HardcoverClient {
    HardcoverClient::new(&SourceConfig {
        api_url: format!("{}/v1/graphql", server.uri()),
        api_token: "test-token".to_string(),
        requests_per_minute: 6000,
        request_timeout_secs: 5,
    })
    .unwrap()
}

fn book(id: i64, language: &str, tags: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("Book {id}"),
        "cached_tags": {"Genre": tags},
        "description": format!("About book {id}"),
        "default_physical_edition": {
            "id": id * 10,
            "title": format!("Book {id}"),
            "isbn_13": format!("978{id:010}"),
            "pages": 320,
            "language": {"id": 1, "language": language},
            "contributions": [
                {"author": {"id": 500, "name": "Shared Author", "bio": "Prolific."}},
                {"author": {"id": id + 1000, "name": format!("Author {id}"), "bio": ""}}
            ]
        }
    })
}

async fn mount_page(server: &MockServer, offset: i64, books: Vec<serde_json::Value>) {
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .and(body_partial_json(json!({"variables": {"limit": 2, "offset": offset}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"books": books}})))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_run_imports_until_target() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        0,
        vec![
            book(1, "English", json!([{"tag": "Fantasy", "count": 40}])),
            book(2, "French", json!([])),
        ],
    )
    .await;
    mount_page(
        &server,
        2,
        vec![book(3, "en", json!([{"tag": "fantasy", "count": 12}]))],
    )
    .await;

    let catalog = MemoryCatalog::new();
    let scraper = Scraper::new(
        catalog.clone(),
        client(&server),
        run_config(2),
        ShutdownSignal::shared(),
    );

    let summary = scraper.run().await.unwrap();

    assert_eq!(summary.exit, RunExit::Completed);
    assert_eq!(summary.books_processed, 3);
    assert_eq!(summary.editions_imported, 2);
    assert_eq!(summary.errors_count, 1);

    let snapshot = catalog.snapshot();
    assert_eq!(snapshot.books.len(), 2);
    // Only the author with a bio is created, and only once
    assert_eq!(snapshot.authors.len(), 1);
    assert_eq!(snapshot.authors[0].external, ExternalRef::hardcover(500));
    // Genre names match case-insensitively
    assert_eq!(snapshot.genres.len(), 1);
    let third = snapshot.book_by_external(&ExternalRef::hardcover(30)).unwrap();
    assert_eq!(snapshot.genre_names_of(third.id), vec!["Fantasy"]);

    let errors = catalog.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Non-English"));

    let run = &catalog.runs()[0];
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.last_offset, 4);
    assert_eq!(run.editions_imported, 2);
}

#[tokio::test]
async fn test_malformed_record_is_logged_and_page_still_imported() {
    let server = MockServer::start().await;
    let mut broken = book(2, "English", json!([]));
    broken["default_physical_edition"]["contributions"][0]["author"]["id"] = json!(null);
    mount_page(&server, 0, vec![book(1, "English", json!([])), broken]).await;
    mount_page(&server, 2, vec![book(3, "English", json!([]))]).await;

    let catalog = MemoryCatalog::new();
    let scraper = Scraper::new(
        catalog.clone(),
        client(&server),
        run_config(2),
        ShutdownSignal::shared(),
    );

    let summary = scraper.run().await.unwrap();

    assert_eq!(summary.exit, RunExit::Completed);
    assert_eq!(summary.books_processed, 3);
    assert_eq!(summary.editions_imported, 2);
    assert_eq!(summary.errors_count, 1);

    let snapshot = catalog.snapshot();
    assert!(snapshot.book_by_external(&ExternalRef::hardcover(10)).is_some());
    assert!(snapshot.book_by_external(&ExternalRef::hardcover(20)).is_none());
    assert!(snapshot.book_by_external(&ExternalRef::hardcover(30)).is_some());

    let errors = catalog.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::Processing);
    assert_eq!(errors[0].subject_id, Some(2));

    let run = &catalog.runs()[0];
    assert_eq!(run.last_offset, 4);
    assert_eq!(run.errors_count, 1);
}

#[tokio::test]
async fn test_stopped_run_resumes_at_recorded_offset() {
    let server = MockServer::start().await;
    mount_page(&server, 40, vec![book(41, "English", json!([]))]).await;

    let catalog = MemoryCatalog::new();
    let stopped = catalog.seed_run(RunStatus::Stopped, 40, 9);
    let scraper = Scraper::new(
        catalog.clone(),
        client(&server),
        run_config(10),
        ShutdownSignal::shared(),
    );

    let summary = scraper.run().await.unwrap();

    assert!(summary.resumed);
    assert_eq!(summary.run_id, stopped);
    assert_eq!(summary.exit, RunExit::Completed);

    let runs = catalog.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].editions_imported, 10);
    assert_eq!(runs[0].last_offset, 42);
}

#[tokio::test]
async fn test_shutdown_before_start_stops_without_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"books": []}})))
        .expect(0)
        .mount(&server)
        .await;

    let catalog = MemoryCatalog::new();
    let shutdown = ShutdownSignal::shared();
    shutdown.request();
    let scraper = Scraper::new(catalog.clone(), client(&server), run_config(10), shutdown);

    let summary = scraper.run().await.unwrap();

    assert_eq!(summary.exit, RunExit::Stopped);
    let run = &catalog.runs()[0];
    assert_eq!(run.status, RunStatus::Stopped);
    assert_eq!(run.last_offset, 0);
}
