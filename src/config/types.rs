use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Browser-like User-Agent sent on the HTTP path and by the browser profile
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "tr-TR,tr;q=0.9,en-US;q=0.7,en;q=0.6";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    pub site: SiteConfig,
    #[serde(default)]
    pub blocking: BlockingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// HTTP fetch behaviour: politeness delay, retries and request headers
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchConfig {
    /// Lower bound of the jittered delay between requests (seconds)
    #[serde(default = "default_min_delay")]
    pub min_delay: f64,

    /// Upper bound of the jittered delay between requests (seconds)
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,

    /// Maximum attempts per URL, including the first
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// First backoff step (seconds), multiplied by `backoff-factor` per attempt
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Maximum random jitter added to each backoff (seconds)
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// Cap on a single backoff sleep (seconds)
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap: f64,

    /// Statuses that are retried rather than surfaced
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            retries: default_retries(),
            timeout: default_timeout(),
            backoff_base: default_backoff_base(),
            backoff_factor: default_backoff_factor(),
            backoff_jitter: default_backoff_jitter(),
            backoff_cap: default_backoff_cap(),
            retry_statuses: default_retry_statuses(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
        }
    }
}

/// Where work items come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SeedMode {
    /// Listing pages first, sitemap when they yield nothing
    #[default]
    Auto,
    /// Listing pages only
    Listing,
    /// Sitemap only
    Sitemap,
}

impl std::fmt::Display for SeedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Listing => write!(f, "listing"),
            Self::Sitemap => write!(f, "sitemap"),
        }
    }
}

/// Crawl orchestration limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    #[serde(default)]
    pub seed: SeedMode,

    /// Number of listing pages to walk
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Cap on discovered work items (0 means unlimited)
    #[serde(default)]
    pub max_items: usize,

    /// Size of the detail-fetch worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Drop product URLs disallowed by robots.txt
    #[serde(default = "default_true")]
    pub respect_robots: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed: SeedMode::default(),
            max_pages: default_max_pages(),
            max_items: 0,
            workers: default_workers(),
            respect_robots: true,
        }
    }
}

/// Browser escalation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub headless: bool,

    /// How long to poll a challenge page for automatic clearance (seconds)
    #[serde(default = "default_challenge_wait")]
    pub challenge_wait: u64,

    /// Interval between clearance polls (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Navigation timeout (seconds)
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout: u64,

    /// Persistent profile directory, reused across runs to keep clearance cookies
    #[serde(default = "default_profile_dir")]
    pub profile_dir: String,

    /// Explicit Chrome/Chromium executable; auto-detected when absent
    #[serde(default)]
    pub executable: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: false,
            challenge_wait: default_challenge_wait(),
            poll_interval: default_poll_interval(),
            navigation_timeout: default_navigation_timeout(),
            profile_dir: default_profile_dir(),
            executable: None,
        }
    }
}

/// On-disk cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    #[serde(default = "default_true")]
    pub read_enabled: bool,

    #[serde(default = "default_true")]
    pub write_enabled: bool,
}

impl CacheConfig {
    pub fn dir(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            read_enabled: true,
            write_enabled: true,
        }
    }
}

/// Site description: where listings live and how product links look
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Short name used in logs
    #[serde(default = "default_site_name")]
    pub name: String,

    /// Origin used to resolve relative links and to locate robots.txt
    pub base_url: String,

    /// Listing page template; `{page}` is replaced with the 1-based page number
    pub listing_url: String,

    /// Product card selector on listing pages
    #[serde(default = "default_item_selector")]
    pub item_selector: String,

    /// Link selector inside a product card
    #[serde(default = "default_link_selector")]
    pub link_selector: String,

    /// Title hint selector inside a product card
    #[serde(default = "default_title_selector")]
    pub title_selector: String,

    /// Price hint selector inside a product card
    #[serde(default)]
    pub price_selector: Option<String>,

    /// Regex a product detail URL must match
    #[serde(default = "default_product_url_pattern")]
    pub product_url_pattern: String,

    /// Sitemap index override; robots.txt is consulted when absent
    #[serde(default)]
    pub sitemap_url: Option<String>,

    /// Substring marking product sitemaps inside a sitemap index
    #[serde(default = "default_sitemap_product_hint")]
    pub sitemap_product_hint: String,

    /// Paths tried when robots.txt lists no sitemap
    #[serde(default = "default_sitemap_fallbacks")]
    pub sitemap_fallbacks: Vec<String>,

    /// Detail page fields: field name to CSS selector
    #[serde(default = "default_fields")]
    pub fields: BTreeMap<String, String>,
}

/// Additional anti-bot markers on top of the built-in lists
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlockingConfig {
    #[serde(default)]
    pub extra_title_phrases: Vec<String>,

    #[serde(default)]
    pub extra_body_fingerprints: Vec<String>,
}

/// Output destinations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// JSON-lines file receiving one product record per line
    #[serde(default)]
    pub records_path: Option<String>,

    /// JSON file receiving the run summary
    #[serde(default)]
    pub summary_path: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_min_delay() -> f64 {
    0.6
}
fn default_max_delay() -> f64 {
    1.2
}
fn default_retries() -> u32 {
    3
}
fn default_timeout() -> u64 {
    25
}
fn default_backoff_base() -> f64 {
    1.0
}
fn default_backoff_factor() -> f64 {
    1.6
}
fn default_backoff_jitter() -> f64 {
    0.4
}
fn default_backoff_cap() -> f64 {
    30.0
}
fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_accept_language() -> String {
    DEFAULT_ACCEPT_LANGUAGE.to_string()
}
fn default_max_pages() -> u32 {
    3
}
fn default_workers() -> usize {
    3
}
fn default_challenge_wait() -> u64 {
    90
}
fn default_poll_interval() -> u64 {
    2
}
fn default_navigation_timeout() -> u64 {
    60
}
fn default_profile_dir() -> String {
    "raw/profile".to_string()
}
fn default_cache_dir() -> String {
    "raw/cache".to_string()
}
fn default_site_name() -> String {
    "site".to_string()
}
fn default_item_selector() -> String {
    "div.prd, li.prd, div.product-list-item, div.product-item".to_string()
}
fn default_link_selector() -> String {
    "a[href]".to_string()
}
fn default_title_selector() -> String {
    ".prd-name, .product-name, h3, h4, a[title]".to_string()
}
fn default_product_url_pattern() -> String {
    r"-p-\d+".to_string()
}
fn default_sitemap_product_hint() -> String {
    "product".to_string()
}
fn default_sitemap_fallbacks() -> Vec<String> {
    vec!["/sitemap.xml".to_string()]
}
fn default_fields() -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), "h1".to_string());
    fields
}
