//! HTTP fetch path against a mock server

use crate::common::{fast_fetch_config, CHALLENGE_HTML};
use laprop_fetch::crawler::{
    BlockDetector, BlockReason, FetchKind, FetchRequest, FetchSource, HttpFetcher, RateLimiter,
};
use laprop_fetch::storage::CacheStore;
use laprop_fetch::FetchError;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(cache_dir: &TempDir) -> HttpFetcher {
    let cache = CacheStore::open(cache_dir.path(), true, true).unwrap();
    HttpFetcher::from_config(
        &fast_fetch_config(),
        RateLimiter::unthrottled(),
        Arc::new(cache),
        BlockDetector::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_retry_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/asus-p-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/asus-p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Asus</h1>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = fetcher(&dir)
        .fetch_url(
            &format!("{}/asus-p-1", server.uri()),
            FetchKind::Product,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.is_fetched(), "unexpected outcome: {:?}", result.outcome);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.source, FetchSource::Http);
    assert_eq!(result.text(), Some("<h1>Asus</h1>"));
    assert!(result.cache_path.as_ref().unwrap().exists());
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/asus-p-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = fetcher(&dir)
        .fetch_url(
            &format!("{}/asus-p-1", server.uri()),
            FetchKind::Product,
            &CancellationToken::new(),
        )
        .await;

    match result.error() {
        Some(FetchError::RetriesExhausted {
            status, attempts, ..
        }) => {
            assert_eq!(*status, Some(503));
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert!(result.body.is_none());
}

#[tokio::test]
async fn test_retryable_status_with_challenge_is_blocked_at_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/asus-p-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string(CHALLENGE_HTML))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = fetcher(&dir)
        .fetch_url(
            &format!("{}/asus-p-1", server.uri()),
            FetchKind::Product,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(
        result.blocked_reason(),
        Some(&BlockReason::Title("just a moment".to_string()))
    );
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_challenge_page_dumped_to_blocked_area() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHALLENGE_HTML))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = fetcher(&dir)
        .fetch_url(
            &format!("{}/laptops", server.uri()),
            FetchKind::List,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(
        result.blocked_reason().map(|r| r.to_string()),
        Some("title_just_a_moment".to_string())
    );
    let dump = result.blocked_path.as_ref().expect("blocked dump written");
    assert!(dump.starts_with(dir.path().join("blocked")));
    assert_eq!(std::fs::read_to_string(dump).unwrap(), CHALLENGE_HTML);
    assert!(result.cache_path.is_none());
    assert!(result.text().is_none());
}

#[tokio::test]
async fn test_forbidden_is_blocked_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/asus-p-1"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = fetcher(&dir)
        .fetch_url(
            &format!("{}/asus-p-1", server.uri()),
            FetchKind::Product,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.blocked_reason(), Some(&BlockReason::HttpStatus(403)));
    assert_eq!(result.status, Some(403));
}

#[tokio::test]
async fn test_not_found_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone-p-1"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<h1>Not found</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = fetcher(&dir)
        .fetch_url(
            &format!("{}/gone-p-1", server.uri()),
            FetchKind::Product,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(
        result.error(),
        Some(&FetchError::TerminalStatus { status: 404 })
    );
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_partial_content_is_not_a_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/asus-p-1"))
        .respond_with(ResponseTemplate::new(206).set_body_string("<h1>Asus</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = fetcher(&dir)
        .fetch_url(
            &format!("{}/asus-p-1", server.uri()),
            FetchKind::Product,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(
        result.error(),
        Some(&FetchError::TerminalStatus { status: 206 })
    );
    assert!(result.cache_path.is_none());
}

#[tokio::test]
async fn test_second_fetch_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/asus-p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Asus</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let fetcher = fetcher(&dir);
    let url = format!("{}/asus-p-1", server.uri());
    let cancel = CancellationToken::new();

    let first = fetcher.fetch_url(&url, FetchKind::Product, &cancel).await;
    let second = fetcher.fetch_url(&url, FetchKind::Product, &cancel).await;

    assert_eq!(first.source, FetchSource::Http);
    assert_eq!(second.source, FetchSource::Cache);
    assert_eq!(second.attempts, 0);
    assert_eq!(second.text(), Some("<h1>Asus</h1>"));
    assert_eq!(first.cache_path, second.cache_path);
}

#[tokio::test]
async fn test_referer_header_sent() {
    let server = MockServer::start().await;
    let referrer = format!("{}/laptops?page=1", server.uri());
    Mock::given(method("GET"))
        .and(path("/asus-p-1"))
        .and(header("referer", referrer.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Asus</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let request = FetchRequest::new(format!("{}/asus-p-1", server.uri()), FetchKind::Product)
        .with_referrer(referrer.clone());
    let result = fetcher(&dir)
        .fetch(&request, &CancellationToken::new())
        .await;

    assert!(result.is_fetched());
}

#[tokio::test]
async fn test_cancelled_fetch_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Asus</h1>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = fetcher(&dir)
        .fetch_url(&format!("{}/asus-p-1", server.uri()), FetchKind::Product, &cancel)
        .await;

    assert_eq!(result.error(), Some(&FetchError::Cancelled));
}
