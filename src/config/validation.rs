use crate::config::types::{
    BrowserSettings, CacheConfig, Config, CrawlConfig, FetchConfig, SiteConfig,
};
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetch_config(&config.fetch)?;
    validate_crawl_config(&config.crawl)?;
    validate_browser_settings(&config.browser)?;
    validate_cache_config(&config.cache)?;
    validate_site_config(&config.site)?;
    Ok(())
}

/// Validates politeness and retry settings
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if !config.min_delay.is_finite() || config.min_delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "min-delay must be a non-negative number of seconds, got {}",
            config.min_delay
        )));
    }

    if !config.max_delay.is_finite() || config.max_delay < config.min_delay {
        return Err(ConfigError::Validation(format!(
            "max-delay ({}) must be >= min-delay ({})",
            config.max_delay, config.min_delay
        )));
    }

    if config.retries < 1 {
        return Err(ConfigError::Validation(
            "retries must be >= 1 (it counts the first attempt)".to_string(),
        ));
    }

    if config.timeout == 0 {
        return Err(ConfigError::Validation(
            "timeout must be >= 1 second".to_string(),
        ));
    }

    for (name, value) in [
        ("backoff-base", config.backoff_base),
        ("backoff-jitter", config.backoff_jitter),
        ("backoff-cap", config.backoff_cap),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{} must be a non-negative number of seconds, got {}",
                name, value
            )));
        }
    }

    if !config.backoff_factor.is_finite() || config.backoff_factor < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff-factor must be >= 1.0, got {}",
            config.backoff_factor
        )));
    }

    if let Some(bad) = config
        .retry_statuses
        .iter()
        .find(|s| !(100..=599).contains(*s))
    {
        return Err(ConfigError::Validation(format!(
            "retry-statuses contains invalid HTTP status {}",
            bad
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    Ok(())
}

fn validate_browser_settings(config: &BrowserSettings) -> Result<(), ConfigError> {
    if config.poll_interval == 0 {
        return Err(ConfigError::Validation(
            "poll-interval must be >= 1 second".to_string(),
        ));
    }

    if config.enabled && config.profile_dir.is_empty() {
        return Err(ConfigError::Validation(
            "profile-dir cannot be empty when the browser is enabled".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.dir.is_empty() {
        return Err(ConfigError::Validation("cache dir cannot be empty".to_string()));
    }
    Ok(())
}

/// Validates URLs, selectors and patterns of the site description
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' must use http or https",
            config.base_url
        )));
    }

    if !config.listing_url.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "listing-url '{}' must contain a {{page}} placeholder",
            config.listing_url
        )));
    }

    base.join(&config.listing_url.replace("{page}", "1"))
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid listing-url: {}", e)))?;

    if let Some(sitemap) = &config.sitemap_url {
        base.join(sitemap)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid sitemap-url: {}", e)))?;
    }

    Regex::new(&config.product_url_pattern).map_err(|e| {
        ConfigError::InvalidPattern(format!(
            "product-url-pattern '{}': {}",
            config.product_url_pattern, e
        ))
    })?;

    validate_selector("item-selector", &config.item_selector)?;
    validate_selector("link-selector", &config.link_selector)?;
    validate_selector("title-selector", &config.title_selector)?;
    if let Some(price) = &config.price_selector {
        validate_selector("price-selector", price)?;
    }
    for (field, selector) in &config.fields {
        validate_selector(&format!("fields.{}", field), selector)?;
    }

    Ok(())
}

fn validate_selector(name: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern(format!("{} '{}': {:?}", name, selector, e)))
}
