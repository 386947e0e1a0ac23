//! Crawl orchestrator - main harvest orchestration logic
//!
//! This module drives one harvest run through its phases:
//! - DISCOVER: walk listing pages, escalating blocked pages through the browser
//! - DISCOVER_VIA_SITEMAP: sitemap fallback when listings yield nothing
//! - DISPATCH / COLLECT: bounded pool of detail-page workers over the HTTP path
//! - ESCALATE: serial browser pass over items blocked on the HTTP path
//! - FINALIZE: close the browser, dedupe records, seal the summary
//!
//! FINALIZE runs on every path out of the run, including cancellation and
//! operator aborts.

use crate::config::{Config, CrawlConfig, SeedMode, SiteConfig};
use crate::crawler::{
    build_record, dedupe_items, BlockDetector, BlockedEvent, BrowserFetcher, ChromiumDriver,
    ChromiumOptions, ConfiguredSite, EscalationOptions, FetchKind, FetchOutcome, FetchRequest,
    FetchResult, FetchStep, HttpFetcher, ProductRecord, RateLimiter, RetryPolicy,
    SiteRules, SitemapDiscovery, StdinPrompt, WorkItem,
};
use crate::output::RunSummary;
use crate::robots::{fetch_robots, is_allowed, ParsedRobots};
use crate::state::{ItemOutcome, ItemReport};
use crate::storage::CacheStore;
use crate::url::canonical_key;
use crate::FetchError;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Everything a run produced
#[derive(Debug)]
pub struct CrawlOutput {
    /// Product records, deduplicated by canonical URL
    pub records: Vec<ProductRecord>,
    /// Every fetch made during the run, bodies dropped
    pub results: Vec<FetchResult>,
    /// One entry per work item
    pub items: Vec<ItemReport>,
    pub summary: RunSummary,
}

/// Output of one detail-page worker
struct WorkerOutput {
    item: WorkItem,
    result: FetchResult,
    record: Option<ProductRecord>,
}

/// Mutable accounting for one run
struct RunState {
    summary: RunSummary,
    results: Vec<FetchResult>,
    records: Vec<ProductRecord>,
    items: Vec<ItemReport>,
    robots: Option<ParsedRobots>,
    robots_loaded: bool,
}

impl RunState {
    fn new(seed: SeedMode) -> Self {
        Self {
            summary: RunSummary::new(seed),
            results: Vec::new(),
            records: Vec::new(),
            items: Vec::new(),
            robots: None,
            robots_loaded: false,
        }
    }

    fn finish_item(&mut self, report: ItemReport) {
        self.summary.record_outcome(report.outcome);
        self.items.push(report);
    }

    /// Assigns the terminal outcome of an item from its final fetch
    fn settle(&mut self, item: WorkItem, result: FetchResult, record: Option<ProductRecord>) {
        let (outcome, detail) = match &result.outcome {
            FetchOutcome::Fetched if record.is_some() => (ItemOutcome::Fetched, None),
            FetchOutcome::Fetched => (ItemOutcome::ParseFailed, None),
            FetchOutcome::Blocked { reason } => (ItemOutcome::Blocked, Some(reason.to_string())),
            FetchOutcome::Failed {
                error: FetchError::Cancelled,
            } => (ItemOutcome::Cancelled, None),
            FetchOutcome::Failed { error } => (ItemOutcome::Error, Some(error.to_string())),
        };

        if outcome == ItemOutcome::ParseFailed {
            tracing::warn!("Nothing usable on {}", item.url);
        }

        let mut report = ItemReport::new(item.url, outcome).with_source(result.source);
        if let Some(detail) = detail {
            report = report.with_detail(detail);
        }
        if let (ItemOutcome::Fetched, Some(record)) = (outcome, record) {
            self.records.push(record);
        }
        self.results.push(result);
        self.finish_item(report);
    }
}

/// Drives discovery, the worker pool and browser escalation
pub struct CrawlOrchestrator {
    fetcher: Arc<HttpFetcher>,
    browser: Option<BrowserFetcher>,
    site: Arc<dyn SiteRules>,
    site_config: SiteConfig,
    crawl: CrawlConfig,
    user_agent: String,
}

impl CrawlOrchestrator {
    /// Creates an orchestrator from its parts
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Shared HTTP fetcher used by discovery and the workers
    /// * `browser` - Escalation fetcher; None disables escalation
    /// * `site` - Site rules
    /// * `site_config` - `[site]` section, for sitemap sources
    /// * `crawl` - Run limits and seed mode
    /// * `user_agent` - Agent checked against robots.txt
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        browser: Option<BrowserFetcher>,
        site: Arc<dyn SiteRules>,
        site_config: SiteConfig,
        crawl: CrawlConfig,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            browser,
            site,
            site_config,
            crawl,
            user_agent: user_agent.into(),
        }
    }

    /// Builds the whole pipeline from configuration
    ///
    /// The browser fetcher shares the rate limiter, retry policy and cache of
    /// the HTTP path. The browser itself is launched lazily.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlOrchestrator)` - Ready to run
    /// * `Err(HarvestError)` - Cache, HTTP client or site rules could not be set up
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let cache = Arc::new(CacheStore::open(
            config.cache.dir(),
            config.cache.read_enabled,
            config.cache.write_enabled,
        )?);
        let limiter = RateLimiter::new(config.fetch.min_delay, config.fetch.max_delay);
        let policy = RetryPolicy::from_config(&config.fetch);
        let detector = BlockDetector::from_config(&config.blocking);

        let fetcher = HttpFetcher::from_config(
            &config.fetch,
            limiter.clone(),
            Arc::clone(&cache),
            detector.clone(),
        )?;
        let site = ConfiguredSite::from_config(&config.site)?;

        let browser = if config.browser.enabled {
            let driver = ChromiumDriver::new(ChromiumOptions::from_config(
                &config.browser,
                &config.fetch,
            ));
            Some(BrowserFetcher::new(
                Box::new(driver),
                Box::new(StdinPrompt),
                limiter,
                policy,
                cache,
                detector,
                EscalationOptions::from_config(&config.browser),
            ))
        } else {
            None
        };

        Ok(Self::new(
            Arc::new(fetcher),
            browser,
            Arc::new(site),
            config.site.clone(),
            config.crawl.clone(),
            config.fetch.user_agent.clone(),
        ))
    }

    /// Replaces the escalation fetcher
    pub fn with_browser(mut self, browser: Option<BrowserFetcher>) -> Self {
        self.browser = browser;
        self
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    /// Runs the harvest to completion
    ///
    /// Never fails: fetch failures, blocks and cancellation are all
    /// reflected in the returned [`CrawlOutput`].
    pub async fn run(&mut self, cancel: &CancellationToken) -> CrawlOutput {
        tracing::info!(
            "Starting harvest of {} (seed: {}, workers: {})",
            self.site.name(),
            self.crawl.seed,
            self.crawl.workers
        );
        let mut run = RunState::new(self.crawl.seed);

        self.execute(&mut run, cancel).await;

        // FINALIZE
        if let Some(browser) = self.browser.as_mut() {
            browser.close().await;
        }
        run.summary.cancelled = cancel.is_cancelled();
        self.finalize(run)
    }

    async fn execute(&mut self, run: &mut RunState, cancel: &CancellationToken) {
        let items = self.seed(run, cancel).await;
        let items = self.prepare(run, items, cancel).await;

        if cancel.is_cancelled() {
            for item in items {
                run.finish_item(ItemReport::new(item.url, ItemOutcome::Cancelled));
            }
            return;
        }

        let escalation = self.dispatch(run, items, cancel).await;
        if !escalation.is_empty() {
            self.escalate(run, escalation, cancel).await;
        }
    }

    /// DISCOVER, then DISCOVER_VIA_SITEMAP as the seed mode allows
    async fn seed(&mut self, run: &mut RunState, cancel: &CancellationToken) -> Vec<WorkItem> {
        match self.crawl.seed {
            SeedMode::Sitemap => self.discover_via_sitemap(run, cancel).await,
            SeedMode::Listing => {
                run.summary.seed_used = SeedMode::Listing;
                self.discover(run, cancel).await
            }
            SeedMode::Auto => {
                let items = self.discover(run, cancel).await;
                if !items.is_empty() || run.summary.aborted || cancel.is_cancelled() {
                    run.summary.seed_used = SeedMode::Listing;
                    return items;
                }
                tracing::info!("Listing pages yielded no products, falling back to sitemap");
                run.summary.seed_used = SeedMode::Sitemap;
                self.discover_via_sitemap(run, cancel).await
            }
        }
    }

    /// Walks listing pages 1..=max_pages
    async fn discover(&mut self, run: &mut RunState, cancel: &CancellationToken) -> Vec<WorkItem> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let budget = self.crawl.max_items;

        for page in 1..=self.crawl.max_pages {
            if cancel.is_cancelled() {
                break;
            }
            let Some(url) = self.site.listing_url(page) else {
                break;
            };
            let page_url = match Url::parse(&url) {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!("Invalid listing URL {}: {}", url, e);
                    break;
                }
            };

            tracing::info!("Listing page {}: {}", page, url);
            let request =
                FetchRequest::new(url.clone(), FetchKind::List).with_referrer(self.site.base_url().as_str());
            let mut result = self.fetcher.fetch(&request, cancel).await;

            if let Some(event) = BlockedEvent::from_result(FetchStep::List, &result) {
                tracing::warn!("Listing page {} blocked: {}", url, event.reason);
                run.summary.blocked_events.push(event);
                run.results.push(result.strip_body());

                let Some(browser) = self.browser.as_mut() else {
                    tracing::warn!("No browser configured, stopping discovery");
                    break;
                };
                result = browser.fetch(&request, cancel).await;

                if let Some(event) = BlockedEvent::from_result(FetchStep::List, &result) {
                    if event.reason.is_manual_abort() {
                        tracing::warn!("Operator aborted on listing page {}", url);
                        run.summary.aborted = true;
                    } else {
                        tracing::warn!("Listing page {} still blocked in browser", url);
                    }
                    run.summary.blocked_events.push(event);
                    run.results.push(result.strip_body());
                    break;
                }
                if !result.is_fetched() {
                    if let Some(error) = result.error() {
                        tracing::warn!("Browser escalation of {} failed: {}", url, error);
                    }
                    run.results.push(result.strip_body());
                    break;
                }
            }

            let found = match result.text() {
                Some(html) => self.site.parse_listing(html, &page_url),
                None => {
                    if let Some(error) = result.error() {
                        tracing::warn!("Listing page {} failed: {}", url, error);
                    }
                    run.results.push(result.strip_body());
                    continue;
                }
            };
            run.results.push(result.strip_body());
            run.summary.pages_visited += 1;

            if found.is_empty() {
                tracing::info!("No products on listing page {}, stopping", page);
                break;
            }

            tracing::debug!("Found {} product(s) on page {}", found.len(), page);
            run.summary.links_discovered += found.len();
            for item in &found {
                seen.insert(canonical_key(&item.url));
            }
            items.extend(found);

            if budget > 0 && seen.len() >= budget {
                tracing::info!("Item budget of {} reached", budget);
                break;
            }
        }

        items
    }

    /// Sitemap-based discovery
    async fn discover_via_sitemap(
        &self,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Vec<WorkItem> {
        self.load_robots(run, cancel).await;

        let discovery = SitemapDiscovery::new(&self.fetcher, self.site.as_ref(), &self.site_config);
        let report = discovery.discover(run.robots.as_ref(), cancel).await;

        run.summary.blocked_events.extend(report.events);
        run.results.extend(report.results);
        run.summary.links_discovered += report.items.len();
        report.items
    }

    /// Fetches robots.txt once per run
    async fn load_robots(&self, run: &mut RunState, cancel: &CancellationToken) {
        if run.robots_loaded {
            return;
        }
        run.robots_loaded = true;

        let Some(fetched) = fetch_robots(&self.fetcher, self.site.base_url(), cancel).await else {
            return;
        };
        if let Some(event) = BlockedEvent::from_result(FetchStep::Robots, &fetched.result) {
            tracing::warn!("robots.txt is blocked: {}", event.reason);
            run.summary.blocked_events.push(event);
        }
        run.results.push(fetched.result.strip_body());
        run.robots = Some(fetched.robots);
    }

    /// Dedupes, applies the item budget and the robots.txt filter
    async fn prepare(
        &self,
        run: &mut RunState,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> Vec<WorkItem> {
        let discovered = items.len();
        let mut unique = dedupe_items(items);
        run.summary.record_drops("duplicate", discovered - unique.len());

        let budget = self.crawl.max_items;
        if budget > 0 && unique.len() > budget {
            run.summary.record_drops("over_budget", unique.len() - budget);
            unique.truncate(budget);
        }
        run.summary.unique_urls = unique.len();
        tracing::info!(
            "{} unique product URL(s) from {} discovered",
            unique.len(),
            discovered
        );

        if !self.crawl.respect_robots || unique.is_empty() || cancel.is_cancelled() {
            return unique;
        }

        self.load_robots(run, cancel).await;
        let Some(robots) = run.robots.take() else {
            return unique;
        };

        let (allowed, denied): (Vec<_>, Vec<_>) = unique
            .into_iter()
            .partition(|item| is_allowed(&robots, &item.url, &self.user_agent));
        run.robots = Some(robots);

        if !denied.is_empty() {
            tracing::info!("{} URL(s) disallowed by robots.txt", denied.len());
        }
        for item in denied {
            tracing::debug!("Disallowed by robots.txt: {}", item.url);
            run.finish_item(ItemReport::new(item.url, ItemOutcome::RobotsDenied));
        }
        allowed
    }

    /// DISPATCH and COLLECT
    ///
    /// # Returns
    ///
    /// Items blocked on the HTTP path, queued for browser escalation
    async fn dispatch(
        &self,
        run: &mut RunState,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> Vec<WorkItem> {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.crawl.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending: HashSet<String> = HashSet::new();
        let mut escalation = Vec::new();
        let mut done = 0usize;

        tracing::info!("Dispatching {} item(s) to {} worker(s)", total, self.crawl.workers);

        for item in items {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    run.finish_item(ItemReport::new(item.url, ItemOutcome::Cancelled));
                    continue;
                }
            };

            let fetcher = Arc::clone(&self.fetcher);
            let site = Arc::clone(&self.site);
            let cancel = cancel.clone();
            pending.insert(item.url.clone());

            tasks.spawn(async move {
                let _permit = permit;
                fetch_item(&fetcher, site.as_ref(), item, &cancel).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(output) => {
                    pending.remove(&output.item.url);
                    self.collect(run, output, &mut escalation);
                }
                Err(e) => tracing::error!("Worker task failed: {}", e),
            }
            done += 1;
            if done % 10 == 0 {
                tracing::info!("Progress: {}/{} item(s) done", done, total);
            }
        }

        // Items whose task died without reporting
        for url in pending {
            run.finish_item(
                ItemReport::new(url, ItemOutcome::Error).with_detail("worker task failed"),
            );
        }

        tracing::info!(
            "Worker pool drained: {} fetched, {} queued for browser",
            run.summary.fetched,
            escalation.len()
        );
        escalation
    }

    fn collect(&self, run: &mut RunState, output: WorkerOutput, escalation: &mut Vec<WorkItem>) {
        let WorkerOutput {
            item,
            result,
            record,
        } = output;

        if let Some(event) = BlockedEvent::from_result(FetchStep::Product, &result) {
            run.summary.blocked_events.push(event);
            if self.browser.is_some() {
                tracing::debug!("Queued for browser: {}", item.url);
                run.results.push(result);
                escalation.push(item);
                return;
            }
        }

        run.settle(item, result, record);
    }

    /// ESCALATE: serial browser pass over HTTP-blocked items
    async fn escalate(&mut self, run: &mut RunState, queue: Vec<WorkItem>, cancel: &CancellationToken) {
        tracing::info!("Escalating {} item(s) through the browser", queue.len());

        let Some(browser) = self.browser.as_mut() else {
            return;
        };
        let site = Arc::clone(&self.site);

        for item in queue {
            if cancel.is_cancelled() || run.summary.aborted {
                run.finish_item(ItemReport::new(item.url, ItemOutcome::Cancelled));
                continue;
            }

            let request = FetchRequest::new(item.url.clone(), FetchKind::Product);
            let result = browser.fetch(&request, cancel).await;
            let record = result
                .text()
                .and_then(|html| build_record(&item, result.source, site.parse_detail(&item, html)));

            if let Some(event) = BlockedEvent::from_result(FetchStep::Product, &result) {
                if event.reason.is_manual_abort() {
                    tracing::warn!("Operator aborted; remaining escalations cancelled");
                    run.summary.aborted = true;
                }
                run.summary.blocked_events.push(event);
            }

            run.settle(item, result.strip_body(), record);
        }
    }

    fn finalize(&self, mut run: RunState) -> CrawlOutput {
        let mut seen = HashSet::new();
        let records: Vec<ProductRecord> = run
            .records
            .into_iter()
            .filter(|record| seen.insert(record.canonical_url.clone()))
            .collect();

        run.summary.finish(&records, &self.site.fields());
        let summary = run.summary;

        tracing::info!(
            "Harvest finished: {} record(s), {} fetched, {} blocked, {} error(s), {} parse failure(s)",
            records.len(),
            summary.fetched,
            summary.blocked,
            summary.errors,
            summary.parse_failures
        );

        CrawlOutput {
            records,
            results: run.results,
            items: run.items,
            summary,
        }
    }
}

/// Fetches and parses one detail page on the HTTP path
async fn fetch_item(
    fetcher: &HttpFetcher,
    site: &dyn SiteRules,
    item: WorkItem,
    cancel: &CancellationToken,
) -> WorkerOutput {
    let request =
        FetchRequest::new(item.url.clone(), FetchKind::Product).with_referrer(site.base_url().as_str());
    let result = fetcher.fetch(&request, cancel).await;

    let record = result
        .text()
        .and_then(|html| build_record(&item, result.source, site.parse_detail(&item, html)));

    WorkerOutput {
        item,
        result: result.strip_body(),
        record,
    }
}
