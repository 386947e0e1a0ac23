//! Sitemap-based product discovery
//!
//! Fallback seed source for when listing pages yield nothing:
//!
//! 1. Sources: configured override, else `Sitemap:` lines in robots.txt,
//!    else the configured fallback paths
//! 2. Each source is read for nested sitemaps whose URL mentions the
//!    product hint, and for product URLs listed directly
//! 3. Without nested product sitemaps, sources mentioning the hint are used
//! 4. Product sitemaps are read for URLs of the site's product shape

use crate::config::SiteConfig;
use crate::crawler::{
    BlockedEvent, FetchKind, FetchResult, FetchStep, HttpFetcher, SiteRules, WorkItem,
};
use crate::robots::ParsedRobots;
use crate::url::site_url;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;

static LOC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[a-z0-9_.-]+:)?loc\b[^>]*>(.*?)</(?:[a-z0-9_.-]+:)?loc\s*>")
        .expect("loc regex is valid") // Static pattern, safe to panic
});

/// Everything sitemap discovery found and touched
#[derive(Debug, Default)]
pub struct SitemapReport {
    /// Product work items, deduplicated, in discovery order
    pub items: Vec<WorkItem>,
    pub events: Vec<BlockedEvent>,
    /// Every sitemap fetch made, bodies dropped
    pub results: Vec<FetchResult>,
}

/// Walks robots.txt and sitemaps down to product URLs
pub struct SitemapDiscovery<'a> {
    fetcher: &'a HttpFetcher,
    site: &'a dyn SiteRules,
    override_url: Option<String>,
    fallbacks: Vec<String>,
    product_hint: String,
}

impl<'a> SitemapDiscovery<'a> {
    pub fn new(fetcher: &'a HttpFetcher, site: &'a dyn SiteRules, config: &SiteConfig) -> Self {
        Self {
            fetcher,
            site,
            override_url: config.sitemap_url.clone(),
            fallbacks: config.sitemap_fallbacks.clone(),
            product_hint: config.sitemap_product_hint.to_lowercase(),
        }
    }

    /// Sitemap URLs to start from, in priority order
    pub fn sources(&self, robots: Option<&ParsedRobots>) -> Vec<String> {
        let base = self.site.base_url();

        if let Some(url) = &self.override_url {
            return site_url(base, url).map(|u| vec![u.to_string()]).unwrap_or_default();
        }

        let declared = robots.map(|r| r.sitemaps()).unwrap_or_default();
        if !declared.is_empty() {
            return declared;
        }

        let mut fallbacks = Vec::new();
        for path in &self.fallbacks {
            if let Some(url) = site_url(base, path) {
                let url = url.to_string();
                if !fallbacks.contains(&url) {
                    fallbacks.push(url);
                }
            }
        }
        fallbacks
    }

    /// Discovers product work items
    ///
    /// # Arguments
    ///
    /// * `robots` - robots.txt of the site, if it was fetched
    /// * `cancel` - Run cancellation token
    ///
    /// # Returns
    ///
    /// A [`SitemapReport`]; blocked sitemaps show up as events, unreachable
    /// ones are skipped with a warning.
    pub async fn discover(
        &self,
        robots: Option<&ParsedRobots>,
        cancel: &CancellationToken,
    ) -> SitemapReport {
        let mut report = SitemapReport::default();
        let sources = self.sources(robots);
        tracing::info!("Sitemap discovery from {} source(s)", sources.len());

        let mut visited: HashSet<String> = HashSet::new();
        let mut nested: Vec<String> = Vec::new();
        let mut product_urls: Vec<String> = Vec::new();

        for source in &sources {
            if cancel.is_cancelled() {
                break;
            }
            visited.insert(source.clone());
            let Some(locs) = self.read(source, FetchStep::SitemapIndex, &mut report, cancel).await
            else {
                continue;
            };

            for loc in locs {
                if self.is_product_sitemap(&loc) {
                    if !nested.contains(&loc) {
                        nested.push(loc);
                    }
                } else if self.site.is_product_url(&loc) {
                    product_urls.push(loc);
                }
            }
        }

        if nested.is_empty() {
            nested = sources
                .iter()
                .filter(|s| s.to_lowercase().contains(&self.product_hint))
                .cloned()
                .collect();
        }

        for sitemap in &nested {
            if cancel.is_cancelled() {
                break;
            }
            // A source reused as a product sitemap was already read above
            if !visited.insert(sitemap.clone()) {
                continue;
            }
            let Some(locs) = self
                .read(sitemap, FetchStep::SitemapProducts, &mut report, cancel)
                .await
            else {
                continue;
            };
            product_urls.extend(locs.into_iter().filter(|loc| self.site.is_product_url(loc)));
        }

        let mut seen = HashSet::new();
        report.items = product_urls
            .into_iter()
            .filter(|url| seen.insert(url.clone()))
            .map(WorkItem::new)
            .collect();

        tracing::info!(
            "Sitemap discovery found {} product URL(s) in {} product sitemap(s)",
            report.items.len(),
            nested.len()
        );
        report
    }

    fn is_product_sitemap(&self, loc: &str) -> bool {
        let lower = loc.to_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or(&lower);
        path.ends_with(".xml") && lower.contains(&self.product_hint)
    }

    /// Fetches one sitemap and returns its `<loc>` values
    async fn read(
        &self,
        url: &str,
        step: FetchStep,
        report: &mut SitemapReport,
        cancel: &CancellationToken,
    ) -> Option<Vec<String>> {
        let result = self.fetcher.fetch_url(url, FetchKind::Sitemap, cancel).await;

        if let Some(event) = BlockedEvent::from_result(step, &result) {
            tracing::warn!("Sitemap {} is blocked: {}", url, event.reason);
            report.events.push(event);
            report.results.push(result.strip_body());
            return None;
        }

        let locs = match result.text() {
            Some(text) => {
                let locs = extract_locs(text);
                if locs.is_empty() && !looks_like_xml(text) {
                    tracing::warn!("Sitemap {} is not XML, skipping", url);
                }
                Some(locs)
            }
            None => {
                if let Some(error) = result.error() {
                    tracing::warn!("Sitemap {} unreachable: {}", url, error);
                }
                None
            }
        };

        report.results.push(result.strip_body());
        locs
    }
}

/// Extracts `<loc>` values from sitemap XML
///
/// Tolerates namespace prefixes (`<ns:loc>`), attributes and CDATA
/// sections, and unescapes the predefined XML entities.
pub fn extract_locs(xml: &str) -> Vec<String> {
    LOC_PATTERN
        .captures_iter(xml)
        .filter_map(|caps| {
            let raw = caps.get(1)?.as_str().trim();
            let raw = raw
                .strip_prefix("<![CDATA[")
                .and_then(|s| s.strip_suffix("]]>"))
                .unwrap_or(raw)
                .trim();
            let value = unescape_xml(raw);
            if value.is_empty() {
                None
            } else {
                Some(value)
            }
        })
        .collect()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn looks_like_xml(text: &str) -> bool {
    let head = text.trim_start();
    head.starts_with("<?xml") || head.starts_with("<urlset") || head.starts_with("<sitemapindex")
}
