//! Crawler module for polite page fetching and harvest orchestration
//!
//! This module contains the core fetch pipeline, including:
//! - Politeness rate limiting and retry with backoff
//! - Cache-aware HTTP fetching and anti-bot block detection
//! - Browser escalation for pages the HTTP path cannot get past
//! - Listing and sitemap discovery behind per-site rules
//! - Overall harvest orchestration

mod block;
mod browser;
mod coordinator;
mod fetcher;
mod rate_limiter;
pub(crate) mod retry;
mod site;
mod sitemap;
mod types;

pub use block::{BlockDetector, BlockReason};
pub use browser::{
    BrowserDriver, BrowserError, BrowserFetcher, ChromiumDriver, ChromiumOptions,
    EscalationOptions, OperatorPrompt, StdinPrompt,
};
pub use coordinator::{CrawlOrchestrator, CrawlOutput};
pub use fetcher::{build_http_client, HttpFetcher};
pub use rate_limiter::RateLimiter;
pub use retry::{Attempt, RetryError, RetryPolicy};
pub use site::{build_record, dedupe_items, ConfiguredSite, DetailFields, SiteRules};
pub use sitemap::{extract_locs, SitemapDiscovery, SitemapReport};
pub use types::{
    BlockedEvent, FetchKind, FetchOutcome, FetchRequest, FetchResult, FetchSource, FetchStep,
    ProductRecord, WorkItem,
};

use crate::config::Config;
use tokio_util::sync::CancellationToken;

/// Runs a complete harvest
///
/// This is the main entry point for a run. It will:
/// 1. Open the cache and build the HTTP client
/// 2. Discover product URLs from listing pages or sitemaps
/// 3. Fetch detail pages through the worker pool
/// 4. Escalate blocked pages through the browser
/// 5. Summarize the run
///
/// # Arguments
///
/// * `config` - The harvest configuration
/// * `cancel` - Cancels the run; the summary is still produced
///
/// # Returns
///
/// * `Ok(CrawlOutput)` - Run finished (possibly cancelled or aborted)
/// * `Err(HarvestError)` - Setup failed before the run started
pub async fn harvest(config: &Config, cancel: &CancellationToken) -> crate::Result<CrawlOutput> {
    let mut orchestrator = CrawlOrchestrator::from_config(config)?;
    Ok(orchestrator.run(cancel).await)
}
