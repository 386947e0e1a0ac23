//! Robots.txt handling module
//!
//! robots.txt is fetched once per run through the normal HTTP path (so it is
//! cached, rate limited and checked for blocks like any other document). It
//! feeds two consumers: the disallow check on product URLs and sitemap
//! discovery.

mod parser;

pub use parser::ParsedRobots;

use crate::crawler::{FetchKind, FetchResult, HttpFetcher};
use tokio_util::sync::CancellationToken;
use url::Url;

/// robots.txt as fetched for this run
#[derive(Debug)]
pub struct RobotsFetch {
    /// Parsed rules; allow-all when the file was missing, blocked or unreachable
    pub robots: ParsedRobots,
    /// The underlying fetch, for accounting and block reporting
    pub result: FetchResult,
}

/// Fetches robots.txt for the origin of `base`
///
/// # Arguments
///
/// * `fetcher` - The shared HTTP fetcher
/// * `base` - Any URL on the site
/// * `cancel` - Run cancellation token
///
/// # Returns
///
/// The parsed rules plus the raw fetch result; anything other than a clean
/// fetch yields [`ParsedRobots::allow_all`]. None only when `base` has no
/// origin to resolve `/robots.txt` against.
pub async fn fetch_robots(
    fetcher: &HttpFetcher,
    base: &Url,
    cancel: &CancellationToken,
) -> Option<RobotsFetch> {
    let robots_url = crate::url::robots_url(base)?;
    // Cached next to the sitemaps, as robots.txt
    let result = fetcher
        .fetch_url(robots_url.as_str(), FetchKind::Sitemap, cancel)
        .await;

    let robots = match result.text() {
        Some(text) => {
            tracing::debug!("Loaded robots.txt from {}", robots_url);
            ParsedRobots::from_content(text)
        }
        None => {
            tracing::info!("No usable robots.txt at {}, allowing all", robots_url);
            ParsedRobots::allow_all()
        }
    };

    Some(RobotsFetch { robots, result })
}

/// Checks if a URL is allowed by robots.txt
pub fn is_allowed(robots: &ParsedRobots, url: &str, user_agent: &str) -> bool {
    robots.is_allowed(url, user_agent)
}
