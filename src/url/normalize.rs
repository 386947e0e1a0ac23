use crate::UrlError;
use url::Url;

/// Tracking query parameters dropped from canonical URLs
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "gclsrc", "msclkid", "yclid", "mc_eid", "mc_cid", "ref", "source",
];

/// Builds the canonical form of a URL, used as the deduplication key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Fold the scheme to https
/// 3. Lowercase the host and drop a leading `www.`
/// 4. Drop the default port
/// 5. Remove dot segments, duplicate and trailing slashes (root stays `/`)
/// 6. Remove the fragment
/// 7. Remove tracking parameters (`utm_*` and [`TRACKING_PARAMS`]), sort the rest
///
/// The result is a key, not a fetchable address: fetches always use the URL
/// as discovered.
///
/// # Examples
///
/// ```
/// use laprop_fetch::url::canonical_url;
///
/// let url = canonical_url("http://WWW.Teknosa.com/laptop-p-123/?utm_source=x#specs").unwrap();
/// assert_eq!(url.as_str(), "https://teknosa.com/laptop-p-123");
/// ```
pub fn canonical_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or(UrlError::MissingDomain)?
        .to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let port = url.port();
    let was_https = url.scheme() == "https";
    url.set_scheme("https")
        .map_err(|_| UrlError::Malformed(format!("Cannot rewrite scheme of {}", url_str)))?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    // An explicit port survives unless it was the default of the original scheme
    let keep_port = match port {
        Some(80) if !was_https => None,
        Some(443) => None,
        other => other,
    };
    url.set_port(keep_port)
        .map_err(|_| UrlError::Malformed(format!("Failed to set port on {}", url_str)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Canonical string form, falling back to the trimmed input for URLs that do not parse
pub fn canonical_key(url_str: &str) -> String {
    canonical_url(url_str)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url_str.trim().to_string())
}

/// Removes dot segments, empty segments and the trailing slash
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}
