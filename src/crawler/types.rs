//! Records exchanged between the fetchers, discovery and the orchestrator

use crate::crawler::BlockReason;
use crate::FetchError;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// What a fetched document is used for; selects the cache area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    List,
    Product,
    Sitemap,
}

impl FetchKind {
    /// File extension of the cache entry for `url`
    ///
    /// Plain-text documents in the sitemap area (robots.txt, text sitemaps)
    /// keep a `.txt` extension.
    pub fn extension_for(&self, url: &str) -> &'static str {
        match self {
            Self::List | Self::Product => "html",
            Self::Sitemap => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                if path.to_ascii_lowercase().ends_with(".txt") {
                    "txt"
                } else {
                    "xml"
                }
            }
        }
    }
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Product => write!(f, "product"),
            Self::Sitemap => write!(f, "sitemap"),
        }
    }
}

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Cache,
    Http,
    Browser,
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Http => write!(f, "http"),
            Self::Browser => write!(f, "browser"),
        }
    }
}

/// A single document to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub kind: FetchKind,
    /// Sent as `Referer` on the HTTP path
    pub referrer: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, kind: FetchKind) -> Self {
        Self {
            url: url.into(),
            kind,
            referrer: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}

/// Terminal explanation of a fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Fetched,
    Blocked { reason: BlockReason },
    Failed { error: FetchError },
}

/// Result of one fetch on any path
///
/// Built only through [`FetchResult::fetched`], [`FetchResult::blocked`] and
/// [`FetchResult::failed`], so every result carries exactly one explanation
/// and a fetched result always has a body.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub url: String,
    pub kind: FetchKind,
    pub status: Option<u16>,
    #[serde(skip)]
    pub body: Option<String>,
    pub source: FetchSource,
    #[serde(flatten)]
    pub outcome: FetchOutcome,
    /// Normal cache entry written or read for this result
    pub cache_path: Option<PathBuf>,
    /// Dump of a blocked body
    pub blocked_path: Option<PathBuf>,
    pub screenshot_path: Option<PathBuf>,
    /// Network attempts made; 0 for cache hits
    pub attempts: u32,
}

impl FetchResult {
    pub fn fetched(
        url: impl Into<String>,
        kind: FetchKind,
        source: FetchSource,
        status: Option<u16>,
        body: String,
    ) -> Self {
        Self {
            url: url.into(),
            kind,
            status,
            body: Some(body),
            source,
            outcome: FetchOutcome::Fetched,
            cache_path: None,
            blocked_path: None,
            screenshot_path: None,
            attempts: 0,
        }
    }

    pub fn blocked(
        url: impl Into<String>,
        kind: FetchKind,
        source: FetchSource,
        status: Option<u16>,
        body: Option<String>,
        reason: BlockReason,
    ) -> Self {
        Self {
            url: url.into(),
            kind,
            status,
            body,
            source,
            outcome: FetchOutcome::Blocked { reason },
            cache_path: None,
            blocked_path: None,
            screenshot_path: None,
            attempts: 0,
        }
    }

    pub fn failed(
        url: impl Into<String>,
        kind: FetchKind,
        source: FetchSource,
        status: Option<u16>,
        error: FetchError,
    ) -> Self {
        Self {
            url: url.into(),
            kind,
            status,
            body: None,
            source,
            outcome: FetchOutcome::Failed { error },
            cache_path: None,
            blocked_path: None,
            screenshot_path: None,
            attempts: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_cache_path(mut self, path: Option<PathBuf>) -> Self {
        self.cache_path = path;
        self
    }

    pub fn with_blocked_path(mut self, path: Option<PathBuf>) -> Self {
        self.blocked_path = path;
        self
    }

    pub fn with_screenshot_path(mut self, path: Option<PathBuf>) -> Self {
        self.screenshot_path = path;
        self
    }

    /// Drops the body once it has been consumed
    pub fn strip_body(mut self) -> Self {
        self.body = None;
        self
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Fetched)
    }

    pub fn blocked_reason(&self) -> Option<&BlockReason> {
        match &self.outcome {
            FetchOutcome::Blocked { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match &self.outcome {
            FetchOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Body of a successful fetch
    pub fn text(&self) -> Option<&str> {
        if self.is_fetched() {
            self.body.as_deref()
        } else {
            None
        }
    }

    /// Best diagnostic HTML for a blocked result: the blocked dump, else the cache entry
    pub fn artifact_path(&self) -> Option<&PathBuf> {
        self.blocked_path.as_ref().or(self.cache_path.as_ref())
    }
}

/// Pipeline step at which a block was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStep {
    List,
    Robots,
    SitemapIndex,
    SitemapProducts,
    Product,
}

impl fmt::Display for FetchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::List => "list",
            Self::Robots => "robots",
            Self::SitemapIndex => "sitemap_index",
            Self::SitemapProducts => "sitemap_products",
            Self::Product => "product",
        };
        f.write_str(s)
    }
}

/// A positively classified block, with the artifacts that show it
///
/// Serializes as `{step, url, reason, source, artifact_paths}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedEvent {
    pub step: FetchStep,
    pub url: String,
    pub reason: BlockReason,
    pub source: FetchSource,
    pub html_path: Option<PathBuf>,
    pub screenshot_path: Option<PathBuf>,
}

impl BlockedEvent {
    /// Event for a blocked result; None for anything else
    pub fn from_result(step: FetchStep, result: &FetchResult) -> Option<Self> {
        let reason = result.blocked_reason()?.clone();
        Some(Self {
            step,
            url: result.url.clone(),
            reason,
            source: result.source,
            html_path: result.artifact_path().cloned(),
            screenshot_path: result.screenshot_path.clone(),
        })
    }

    /// Artifact paths that exist for this event
    pub fn artifact_paths(&self) -> Vec<&PathBuf> {
        self.html_path
            .iter()
            .chain(self.screenshot_path.iter())
            .collect()
    }
}

impl Serialize for BlockedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("BlockedEvent", 5)?;
        state.serialize_field("step", &self.step)?;
        state.serialize_field("url", &self.url)?;
        state.serialize_field("reason", &self.reason)?;
        state.serialize_field("source", &self.source)?;
        state.serialize_field("artifact_paths", &self.artifact_paths())?;
        state.end()
    }
}

/// One URL to fetch, with whatever the discovering page told us about it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub url: String,
    /// Title guess from the listing card
    pub title_hint: Option<String>,
    /// Price text from the listing card
    pub price_hint: Option<String>,
}

impl WorkItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_hints(mut self, title: Option<String>, price: Option<String>) -> Self {
        self.title_hint = title.filter(|t| !t.trim().is_empty());
        self.price_hint = price.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn has_hints(&self) -> bool {
        self.title_hint.is_some() || self.price_hint.is_some()
    }

    /// Fills missing hints from another sighting of the same product
    pub fn merge_hints(&mut self, other: &WorkItem) {
        if self.title_hint.is_none() {
            self.title_hint = other.title_hint.clone();
        }
        if self.price_hint.is_none() {
            self.price_hint = other.price_hint.clone();
        }
    }

    /// Hint values keyed by the record field they stand in for
    pub fn hint_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        if let Some(title) = &self.title_hint {
            fields.insert("name".to_string(), title.clone());
        }
        if let Some(price) = &self.price_hint {
            fields.insert("price".to_string(), price.clone());
        }
        fields
    }
}

/// Parsed product detail handed to downstream consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub url: String,
    pub canonical_url: String,
    pub source: FetchSource,
    pub fields: BTreeMap<String, String>,
    /// True when the detail page yielded nothing and the listing hints were used
    pub from_hints: bool,
}

impl ProductRecord {
    /// Adds hint values for fields the detail page did not provide
    pub fn fill_from_hints(&mut self, item: &WorkItem) {
        for (name, value) in item.hint_fields() {
            self.fields.entry(name).or_insert(value);
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}
