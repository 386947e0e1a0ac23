//! Storage module for fetched artifacts
//!
//! This module owns the on-disk cache that lets a run be repeated without
//! hitting the site again, and the separate areas where blocked pages and
//! challenge screenshots are dumped for diagnosis:
//!
//! ```text
//! cache_dir/
//!   list/         listing pages that fetched cleanly
//!   product/      product detail pages
//!   sitemap/      robots.txt, sitemap indexes and product sitemaps
//!   blocked/      bodies that were classified as blocked
//!   screenshots/  browser screenshots taken at a challenge
//! ```

mod cache;

pub use cache::{safe_slug, CacheStore};

use crate::crawler::FetchKind;
use thiserror::Error;

/// Errors that can occur while preparing or clearing the cache
///
/// Individual reads and writes never fail a fetch; they are logged and
/// treated as a miss or a skipped write.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Subdirectory of the cache root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheArea {
    List,
    Product,
    Sitemap,
    Blocked,
    Screenshots,
}

impl CacheArea {
    pub const ALL: [CacheArea; 5] = [
        CacheArea::List,
        CacheArea::Product,
        CacheArea::Sitemap,
        CacheArea::Blocked,
        CacheArea::Screenshots,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Product => "product",
            Self::Sitemap => "sitemap",
            Self::Blocked => "blocked",
            Self::Screenshots => "screenshots",
        }
    }
}

impl From<FetchKind> for CacheArea {
    fn from(kind: FetchKind) -> Self {
        match kind {
            FetchKind::List => Self::List,
            FetchKind::Product => Self::Product,
            FetchKind::Sitemap => Self::Sitemap,
        }
    }
}
