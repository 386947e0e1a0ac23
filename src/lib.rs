//! laprop-fetch: a polite, resilient product-page harvester
//!
//! This crate implements the fetch pipeline behind the laptop price scrapers:
//! a rate-limited, cached, retrying HTTP fetcher that recognises anti-bot
//! challenge pages and escalates to a persistent browser profile when the
//! lightweight path is blocked, with sitemap-based discovery as a fallback.

pub mod config;
pub mod crawler;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use serde::Serialize;
use thiserror::Error;

/// Error type for setting up and driving a harvest run
///
/// Fetch failures are never reported through this type; they are carried on
/// [`crawler::FetchResult`] instead.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure modes of a single fetch
///
/// Blocked content and operator aborts are not errors; they are
/// [`crawler::BlockReason`]s.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    /// Connection, DNS, TLS or timeout failure on the final attempt
    #[error("network error: {message}")]
    TransientNetwork { message: String },

    /// Every attempt ended in a retryable status or network error
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        status: Option<u16>,
        attempts: u32,
        last_error: String,
    },

    /// Non-retryable HTTP status that was not classified as a block
    #[error("http_{status}")]
    TerminalStatus { status: u16 },

    /// Browser could not be launched or driven
    #[error("browser error: {message}")]
    Browser { message: String },

    /// The run was cancelled before this fetch completed
    #[error("cancelled")]
    Cancelled,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{BlockReason, BlockedEvent, FetchKind, FetchResult, FetchSource, WorkItem};
pub use state::ItemOutcome;
pub use url::canonical_url;
