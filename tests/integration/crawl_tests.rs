//! Integration tests for the orchestrator
//!
//! These tests use wiremock to create mock sites and run the full
//! discover, dispatch, escalate and finalize cycle end-to-end.

use crate::common::{
    empty_listing_html, fake_browser, listing_html, mount_listing, mount_page, mount_robots,
    product_html, test_config, FakeDriver, FakePrompt, CHALLENGE_HTML,
};
use laprop_fetch::config::SeedMode;
use laprop_fetch::crawler::{CrawlOrchestrator, FetchSource, FetchStep};
use laprop_fetch::storage::CacheStore;
use laprop_fetch::ItemOutcome;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ALLOW_ALL: &str = "User-agent: *\nAllow: /";

#[tokio::test]
async fn test_listing_harvest_two_products() {
    let server = MockServer::start().await;
    mount_robots(&server, ALLOW_ALL).await;
    mount_listing(
        &server,
        1,
        listing_html(&[
            ("/asus-vivobook-p-125", "Asus Vivobook", "25.999 TL"),
            ("/lenovo-ideapad-p-777", "Lenovo IdeaPad", "21.499 TL"),
        ]),
    )
    .await;
    mount_listing(&server, 2, empty_listing_html()).await;
    mount_page(&server, "/asus-vivobook-p-125", 200, product_html("Asus Vivobook 15", "25.999 TL")).await;
    mount_page(&server, "/lenovo-ideapad-p-777", 200, product_html("Lenovo IdeaPad 3", "21.499 TL")).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert_eq!(summary.seed_used, SeedMode::Listing);
    assert_eq!(summary.pages_visited, 2);
    assert_eq!(summary.links_discovered, 2);
    assert_eq!(summary.unique_urls, 2);
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.blocked, 0);
    assert_eq!(summary.errors, 0);
    assert!(summary.blocked_events.is_empty());
    assert!(summary.finished_at.is_some());
    assert!(!summary.cancelled);

    assert_eq!(output.records.len(), 2);
    let asus = output
        .records
        .iter()
        .find(|r| r.url.ends_with("/asus-vivobook-p-125"))
        .unwrap();
    assert_eq!(asus.fields["name"], "Asus Vivobook 15");
    assert_eq!(asus.fields["price"], "25.999 TL");
    assert!(!asus.from_hints);
    assert_eq!(summary.completeness["name"], 100.0);
    assert_eq!(output.items.len(), 2);
}

#[tokio::test]
async fn test_blocked_product_without_browser() {
    let server = MockServer::start().await;
    mount_robots(&server, ALLOW_ALL).await;
    mount_listing(
        &server,
        1,
        listing_html(&[
            ("/asus-vivobook-p-125", "Asus Vivobook", "25.999 TL"),
            ("/lenovo-ideapad-p-777", "Lenovo IdeaPad", "21.499 TL"),
        ]),
    )
    .await;
    mount_listing(&server, 2, empty_listing_html()).await;
    mount_page(&server, "/asus-vivobook-p-125", 403, "Access denied".to_string()).await;
    mount_page(&server, "/lenovo-ideapad-p-777", 200, product_html("Lenovo IdeaPad 3", "21.499 TL")).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    assert!(!orchestrator.has_browser());
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.blocked, 1);
    assert_eq!(summary.dropped_count("blocked"), 1);
    assert_eq!(summary.blocked_events.len(), 1);

    let event = &summary.blocked_events[0];
    assert_eq!(event.step, FetchStep::Product);
    assert_eq!(event.reason.to_string(), "http_403");
    assert!(event.url.ends_with("/asus-vivobook-p-125"));
    assert!(event.html_path.as_ref().unwrap().exists());

    let blocked = output
        .items
        .iter()
        .find(|i| i.outcome == ItemOutcome::Blocked)
        .unwrap();
    assert_eq!(blocked.detail.as_deref(), Some("http_403"));
}

#[tokio::test]
async fn test_blocked_product_escalated_through_browser() {
    let server = MockServer::start().await;
    mount_robots(&server, ALLOW_ALL).await;
    mount_listing(
        &server,
        1,
        listing_html(&[
            ("/asus-vivobook-p-125", "Asus Vivobook", "25.999 TL"),
            ("/lenovo-ideapad-p-777", "Lenovo IdeaPad", "21.499 TL"),
        ]),
    )
    .await;
    mount_listing(&server, 2, empty_listing_html()).await;
    mount_page(&server, "/asus-vivobook-p-125", 200, CHALLENGE_HTML.to_string()).await;
    mount_page(&server, "/lenovo-ideapad-p-777", 200, product_html("Lenovo IdeaPad 3", "21.499 TL")).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let driver = FakeDriver::serving(&product_html("Asus Vivobook 15", "25.999 TL"));
    let log = driver.log.clone();
    let cache = Arc::new(CacheStore::open(dir.path(), true, true).unwrap());
    let browser = fake_browser(driver, FakePrompt::replying(""), cache, false, Duration::ZERO);

    let mut orchestrator = CrawlOrchestrator::from_config(&config)
        .unwrap()
        .with_browser(Some(browser));
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.blocked, 0);
    assert_eq!(summary.blocked_events.len(), 1);
    assert_eq!(summary.blocked_events[0].source, FetchSource::Http);

    let asus = output
        .records
        .iter()
        .find(|r| r.url.ends_with("/asus-vivobook-p-125"))
        .unwrap();
    assert_eq!(asus.source, FetchSource::Browser);
    assert_eq!(asus.fields["name"], "Asus Vivobook 15");

    assert_eq!(log.launches(), 1);
    assert_eq!(log.closes(), 1);
}

#[tokio::test]
async fn test_manual_abort_cancels_remaining_escalations() {
    let server = MockServer::start().await;
    mount_robots(&server, ALLOW_ALL).await;
    mount_listing(
        &server,
        1,
        listing_html(&[
            ("/asus-vivobook-p-125", "Asus Vivobook", "25.999 TL"),
            ("/lenovo-ideapad-p-777", "Lenovo IdeaPad", "21.499 TL"),
        ]),
    )
    .await;
    mount_listing(&server, 2, empty_listing_html()).await;
    mount_page(&server, "/asus-vivobook-p-125", 403, "Access denied".to_string()).await;
    mount_page(&server, "/lenovo-ideapad-p-777", 403, "Access denied".to_string()).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let driver = FakeDriver::serving(CHALLENGE_HTML);
    let log = driver.log.clone();
    let prompt = FakePrompt::replying("abort");
    let cache = Arc::new(CacheStore::open(dir.path(), true, true).unwrap());
    let browser = fake_browser(driver, prompt.clone(), cache, false, Duration::ZERO);

    let mut orchestrator = CrawlOrchestrator::from_config(&config)
        .unwrap()
        .with_browser(Some(browser));
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert!(summary.aborted);
    assert_eq!(summary.blocked, 1);
    assert_eq!(summary.dropped_count("cancelled"), 1);
    assert_eq!(summary.fetched, 0);
    assert!(output.records.is_empty());
    assert_eq!(prompt.asked(), 1);
    assert_eq!(log.navigations().len(), 1);
    assert_eq!(log.closes(), 1);

    let aborted = output
        .items
        .iter()
        .find(|i| i.outcome == ItemOutcome::Blocked)
        .unwrap();
    assert_eq!(aborted.detail.as_deref(), Some("manual_abort"));
    assert!(summary
        .blocked_events
        .iter()
        .any(|e| e.reason.is_manual_abort()));
}

#[tokio::test]
async fn test_sitemap_fallback_when_listing_empty() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_robots(
        &server,
        &format!("User-agent: *\nAllow: /\nSitemap: {}/sitemap_index.xml", base),
    )
    .await;
    mount_listing(&server, 1, empty_listing_html()).await;

    Mock::given(method("GET"))
        .and(path("/sitemap_index.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{base}/product-sitemap-1.xml</loc></sitemap>
  <sitemap><loc>{base}/category-sitemap.xml</loc></sitemap>
</sitemapindex>"#
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/product-sitemap-1.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/asus-vivobook-p-125</loc></url>
  <url><loc>{base}/lenovo-ideapad-p-777</loc></url>
  <url><loc>{base}/hakkimizda</loc></url>
</urlset>"#
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/category-sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<urlset></urlset>"))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "/asus-vivobook-p-125", 200, product_html("Asus Vivobook 15", "25.999 TL")).await;
    mount_page(&server, "/lenovo-ideapad-p-777", 200, product_html("Lenovo IdeaPad 3", "21.499 TL")).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert_eq!(summary.seed_used, SeedMode::Sitemap);
    assert_eq!(summary.pages_visited, 1);
    assert_eq!(summary.unique_urls, 2);
    assert_eq!(summary.fetched, 2);
    assert!(output.records.iter().all(|r| !r.from_hints));
}

#[tokio::test]
async fn test_listing_mode_never_uses_sitemap() {
    let server = MockServer::start().await;
    mount_robots(&server, ALLOW_ALL).await;
    mount_listing(&server, 1, empty_listing_html()).await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<urlset></urlset>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path());
    config.crawl.seed = SeedMode::Listing;
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;

    assert_eq!(output.summary.seed_used, SeedMode::Listing);
    assert_eq!(output.summary.unique_urls, 0);
    assert!(output.items.is_empty());
    assert!(output.summary.finished_at.is_some());
}

fn urlset(locs: &[String]) -> String {
    let urls: String = locs
        .iter()
        .map(|loc| format!("<url><loc>{}</loc></url>", loc))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{}</urlset>"#,
        urls
    )
}

#[tokio::test]
async fn test_bad_sitemaps_are_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_robots(
        &server,
        &format!(
            "User-agent: *\nAllow: /\nSitemap: {base}/gone.xml\nSitemap: {base}/kampanya.xml\nSitemap: {base}/sitemap_index.xml"
        ),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/gone.xml"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/kampanya.xml",
        200,
        "<html><body><p>Kampanyalar</p></body></html>".to_string(),
    )
    .await;
    mount_page(
        &server,
        "/sitemap_index.xml",
        200,
        format!(
            r#"<sitemapindex><sitemap><loc>{base}/product-sitemap-1.xml</loc></sitemap><sitemap><loc>{base}/product-sitemap-2.xml</loc></sitemap></sitemapindex>"#
        ),
    )
    .await;
    mount_page(&server, "/product-sitemap-1.xml", 403, "Forbidden".to_string()).await;
    mount_page(
        &server,
        "/product-sitemap-2.xml",
        200,
        urlset(&[
            format!("{base}/asus-vivobook-p-125"),
            format!("{base}/lenovo-ideapad-p-777"),
        ]),
    )
    .await;
    mount_page(&server, "/asus-vivobook-p-125", 200, product_html("Asus Vivobook 15", "25.999 TL")).await;
    mount_page(&server, "/lenovo-ideapad-p-777", 200, product_html("Lenovo IdeaPad 3", "21.499 TL")).await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path());
    config.crawl.seed = SeedMode::Sitemap;
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert_eq!(summary.seed_used, SeedMode::Sitemap);
    assert_eq!(summary.unique_urls, 2);
    assert_eq!(summary.fetched, 2);

    assert_eq!(summary.blocked_events.len(), 1);
    let event = &summary.blocked_events[0];
    assert_eq!(event.step, FetchStep::SitemapProducts);
    assert_eq!(event.reason.to_string(), "http_403");
    assert!(event.url.ends_with("/product-sitemap-1.xml"));
}

#[tokio::test]
async fn test_blocked_sitemap_index_is_reported() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_robots(
        &server,
        &format!("User-agent: *\nAllow: /\nSitemap: {base}/sitemap_index.xml"),
    )
    .await;
    mount_page(&server, "/sitemap_index.xml", 200, CHALLENGE_HTML.to_string()).await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path());
    config.crawl.seed = SeedMode::Sitemap;
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert_eq!(summary.unique_urls, 0);
    assert_eq!(summary.blocked_events.len(), 1);
    assert_eq!(summary.blocked_events[0].step, FetchStep::SitemapIndex);
    assert_eq!(
        summary.blocked_events[0].reason.to_string(),
        "title_just_a_moment"
    );
    assert!(summary.blocked_events[0].artifact_paths()[0].exists());
}

#[tokio::test]
async fn test_sitemap_fallback_paths_without_declarations() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_robots(&server, ALLOW_ALL).await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(urlset(&[format!("{base}/hp-victus-p-300")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/hp-victus-p-300", 200, product_html("HP Victus 16", "31.999 TL")).await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path());
    config.crawl.seed = SeedMode::Sitemap;
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;

    assert_eq!(output.summary.fetched, 1);
    assert!(output.records[0].url.ends_with("/hp-victus-p-300"));
}

#[tokio::test]
async fn test_duplicates_fetched_once() {
    let server = MockServer::start().await;
    mount_robots(&server, ALLOW_ALL).await;
    mount_listing(
        &server,
        1,
        listing_html(&[
            ("/asus-vivobook-p-125", "Asus Vivobook", ""),
            ("/asus-vivobook-p-125?utm_source=banner", "Asus Vivobook", "25.999 TL"),
            ("/lenovo-ideapad-p-777", "Lenovo IdeaPad", "21.499 TL"),
        ]),
    )
    .await;
    mount_listing(
        &server,
        2,
        listing_html(&[
            ("/asus-vivobook-p-125", "Asus Vivobook", "25.999 TL"),
            ("/hp-victus-p-300", "HP Victus", "31.999 TL"),
        ]),
    )
    .await;
    mount_listing(&server, 3, empty_listing_html()).await;

    Mock::given(method("GET"))
        .and(path("/asus-vivobook-p-125"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><p>bare</p></body></html>"))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/lenovo-ideapad-p-777", 200, product_html("Lenovo IdeaPad 3", "21.499 TL")).await;
    mount_page(&server, "/hp-victus-p-300", 200, product_html("HP Victus 16", "31.999 TL")).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert_eq!(summary.links_discovered, 5);
    assert_eq!(summary.unique_urls, 3);
    assert_eq!(summary.dropped_count("duplicate"), 2);
    assert_eq!(summary.fetched, 3);
    assert_eq!(output.records.len(), 3);

    // The bare detail page falls back to merged listing hints
    let asus = output
        .records
        .iter()
        .find(|r| r.url.ends_with("/asus-vivobook-p-125"))
        .unwrap();
    assert!(asus.from_hints);
    assert_eq!(asus.fields["name"], "Asus Vivobook");
    assert_eq!(asus.fields["price"], "25.999 TL");
}

#[tokio::test]
async fn test_item_budget_stops_discovery() {
    let server = MockServer::start().await;
    mount_robots(&server, ALLOW_ALL).await;
    mount_listing(
        &server,
        1,
        listing_html(&[
            ("/asus-vivobook-p-125", "Asus Vivobook", "25.999 TL"),
            ("/lenovo-ideapad-p-777", "Lenovo IdeaPad", "21.499 TL"),
            ("/hp-victus-p-300", "HP Victus", "31.999 TL"),
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(wiremock::matchers::query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(empty_listing_html()))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hp-victus-p-300"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_html("HP Victus 16", "31.999 TL")))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "/asus-vivobook-p-125", 200, product_html("Asus Vivobook 15", "25.999 TL")).await;
    mount_page(&server, "/lenovo-ideapad-p-777", 200, product_html("Lenovo IdeaPad 3", "21.499 TL")).await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path());
    config.crawl.max_items = 2;
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;

    assert_eq!(output.summary.unique_urls, 2);
    assert_eq!(output.summary.dropped_count("over_budget"), 1);
    assert_eq!(output.summary.fetched, 2);
}

#[tokio::test]
async fn test_robots_disallowed_products_dropped() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nDisallow: /gizli").await;
    mount_listing(
        &server,
        1,
        listing_html(&[
            ("/asus-vivobook-p-125", "Asus Vivobook", "25.999 TL"),
            ("/gizli-laptop-p-9", "Gizli", "1 TL"),
        ]),
    )
    .await;
    mount_listing(&server, 2, empty_listing_html()).await;
    mount_page(&server, "/asus-vivobook-p-125", 200, product_html("Asus Vivobook 15", "25.999 TL")).await;
    Mock::given(method("GET"))
        .and(path("/gizli-laptop-p-9"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_html("Gizli", "1 TL")))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;

    assert_eq!(output.summary.fetched, 1);
    assert_eq!(output.summary.dropped_count("robots_disallowed"), 1);
    assert!(output
        .items
        .iter()
        .any(|i| i.outcome == ItemOutcome::RobotsDenied && i.url.ends_with("/gizli-laptop-p-9")));
}

#[tokio::test]
async fn test_blocked_listing_without_browser_stops_discovery() {
    let server = MockServer::start().await;
    mount_robots(&server, ALLOW_ALL).await;
    mount_listing(&server, 1, CHALLENGE_HTML.to_string()).await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(wiremock::matchers::query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(empty_listing_html()))
        .expect(0)
        .mount(&server)
        .await;
    // Auto mode falls back to the sitemap, which has nothing
    mount_page(&server, "/sitemap.xml", 200, "<urlset></urlset>".to_string()).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let mut orchestrator = CrawlOrchestrator::from_config(&config).unwrap();
    let output = orchestrator.run(&CancellationToken::new()).await;
    let summary = &output.summary;

    assert_eq!(summary.pages_visited, 0);
    assert_eq!(summary.unique_urls, 0);
    assert_eq!(summary.blocked_events.len(), 1);
    assert_eq!(summary.blocked_events[0].step, FetchStep::List);
    assert!(!summary.aborted);
}

#[tokio::test]
async fn test_cancelled_run_still_finalizes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(empty_listing_html()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path());
    let driver = FakeDriver::serving(CHALLENGE_HTML);
    let log = driver.log.clone();
    let cache = Arc::new(CacheStore::open(dir.path(), true, true).unwrap());
    let browser = fake_browser(driver, FakePrompt::replying(""), cache, false, Duration::ZERO);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut orchestrator = CrawlOrchestrator::from_config(&config)
        .unwrap()
        .with_browser(Some(browser));
    let output = orchestrator.run(&cancel).await;

    assert!(output.summary.cancelled);
    assert!(output.summary.finished_at.is_some());
    assert!(output.records.is_empty());
    assert_eq!(log.launches(), 0);
}
