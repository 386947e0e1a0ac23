//! Anti-bot block detection
//!
//! A best-effort classifier for challenge pages, access-denied walls and
//! empty responses. It looks at the HTTP status, the `<title>` text and a
//! handful of body fingerprints left by common bot-protection vendors.

use crate::config::BlockingConfig;
use scraper::{Html, Selector};
use serde::{Serialize, Serializer};
use std::fmt;

/// Statuses that mean the site refused us rather than failed
const BLOCKED_STATUSES: &[u16] = &[401, 403, 429, 503];

const TITLE_PHRASES: &[&str] = &[
    "just a moment",
    "attention required",
    "access denied",
    "checking your browser",
    "verify you are human",
];

const BODY_FINGERPRINTS: &[&str] = &[
    "/cdn-cgi/",
    "cf-ray",
    "cloudflare",
    "cf-challenge",
    "captcha",
    "g-recaptcha",
    "hcaptcha",
    "security check",
    "enable cookies",
];

/// Why a response was classified as blocked
///
/// Serializes to the short reason codes used in reports, e.g. `http_403`,
/// `title_just_a_moment` or `body_cdn-cgi`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockReason {
    /// Refusal status code
    HttpStatus(u16),
    /// Empty or whitespace-only body
    EmptyResponse,
    /// Challenge phrase found in the page title
    Title(String),
    /// Vendor fingerprint found in the body
    BodyFingerprint(String),
    /// The operator gave up on a challenge
    ManualAbort,
}

impl BlockReason {
    pub fn is_manual_abort(&self) -> bool {
        matches!(self, Self::ManualAbort)
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpStatus(status) => write!(f, "http_{}", status),
            Self::EmptyResponse => write!(f, "empty_response"),
            Self::Title(phrase) => write!(f, "title_{}", phrase.replace(' ', "_")),
            Self::BodyFingerprint(fp) => {
                write!(f, "body_{}", fp.replace('/', "").replace(' ', "_"))
            }
            Self::ManualAbort => write!(f, "manual_abort"),
        }
    }
}

impl Serialize for BlockReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Classifies responses as blocked or not
#[derive(Debug, Clone)]
pub struct BlockDetector {
    title_phrases: Vec<String>,
    body_fingerprints: Vec<String>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDetector {
    /// Creates a detector with the built-in phrase and fingerprint lists
    pub fn new() -> Self {
        Self {
            title_phrases: TITLE_PHRASES.iter().map(|s| s.to_string()).collect(),
            body_fingerprints: BODY_FINGERPRINTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Creates a detector with the built-in lists extended from configuration
    pub fn from_config(config: &BlockingConfig) -> Self {
        let mut detector = Self::new();
        detector.extend(&config.extra_title_phrases, &config.extra_body_fingerprints);
        detector
    }

    fn extend(&mut self, titles: &[String], fingerprints: &[String]) {
        for phrase in titles {
            let phrase = phrase.trim().to_lowercase();
            if !phrase.is_empty() && !self.title_phrases.contains(&phrase) {
                self.title_phrases.push(phrase);
            }
        }
        for fp in fingerprints {
            let fp = fp.trim().to_lowercase();
            if !fp.is_empty() && !self.body_fingerprints.contains(&fp) {
                self.body_fingerprints.push(fp);
            }
        }
    }

    /// Classifies a response, first matching rule wins
    ///
    /// # Rules
    ///
    /// 1. Status in {401, 403, 429, 503} → `http_<status>`
    /// 2. Empty or whitespace-only body → `empty_response`
    /// 3. Title contains a challenge phrase → `title_<phrase>`
    /// 4. Body contains a vendor fingerprint → `body_<fingerprint>`
    ///
    /// # Arguments
    ///
    /// * `status` - HTTP status, or None when unknown (cache, browser)
    /// * `body` - Response body, or None when there was none
    ///
    /// # Returns
    ///
    /// * `Some(BlockReason)` - The response looks blocked
    /// * `None` - The response looks like real content
    pub fn classify(&self, status: Option<u16>, body: Option<&str>) -> Option<BlockReason> {
        if let Some(status) = status {
            if BLOCKED_STATUSES.contains(&status) {
                return Some(BlockReason::HttpStatus(status));
            }
        }

        let body = body.unwrap_or("");
        if body.trim().is_empty() {
            return Some(BlockReason::EmptyResponse);
        }

        self.classify_content(body)
    }

    /// Applies only the title and fingerprint rules
    ///
    /// Used where the status alone must not decide, such as a retryable
    /// status whose body may still be a challenge page.
    pub fn classify_content(&self, body: &str) -> Option<BlockReason> {
        if let Some(title) = extract_title(&Html::parse_document(body)) {
            if let Some(phrase) = self.title_phrases.iter().find(|p| title.contains(p.as_str())) {
                return Some(BlockReason::Title(phrase.clone()));
            }
        }

        let lower = body.to_lowercase();
        self.body_fingerprints
            .iter()
            .find(|fp| lower.contains(fp.as_str()))
            .map(|fp| BlockReason::BodyFingerprint(fp.clone()))
    }
}

/// Lower-cased, whitespace-collapsed text of the first `<title>` element
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| {
            element
                .text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        })
        .filter(|s| !s.is_empty())
}
