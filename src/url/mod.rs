//! URL handling module
//!
//! Canonicalization for deduplication, link resolution against the page that
//! contained them, and origin-relative helpers for robots.txt and sitemaps.

mod normalize;

pub use normalize::{canonical_key, canonical_url};

use url::Url;

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only anchors
/// - anything that does not resolve to http or https
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}

/// Location of robots.txt for the origin of `base`
pub fn robots_url(base: &Url) -> Option<Url> {
    base.join("/robots.txt").ok()
}

/// Resolves a configured path or absolute URL against the site origin
pub fn site_url(base: &Url, path_or_url: &str) -> Option<Url> {
    base.join(path_or_url.trim()).ok()
}
