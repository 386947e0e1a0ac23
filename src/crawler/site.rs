//! Site extraction rules
//!
//! The pipeline itself knows nothing about a retailer's markup. Everything
//! site-specific goes through [`SiteRules`]: where listing pages live, how
//! product cards and product URLs look, and which fields a detail page
//! yields. [`ConfiguredSite`] implements it from CSS selectors and a URL
//! regex in the `[site]` config section.

use crate::config::SiteConfig;
use crate::crawler::{FetchSource, ProductRecord, WorkItem};
use crate::url::{canonical_key, resolve_link};
use crate::{ConfigError, ConfigResult};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Field values parsed from a detail page
pub type DetailFields = BTreeMap<String, String>;

/// Per-site discovery and extraction rules
pub trait SiteRules: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Origin of the site
    fn base_url(&self) -> &Url;

    /// Absolute URL of the 1-based listing page
    fn listing_url(&self, page: u32) -> Option<String>;

    /// Work items found on a listing page, in page order
    ///
    /// Repeats are kept; the caller dedupes across all pages.
    fn parse_listing(&self, html: &str, page_url: &Url) -> Vec<WorkItem>;

    /// Whether `url` looks like a product detail page
    fn is_product_url(&self, url: &str) -> bool;

    /// Fields found on a detail page; None when the page yields nothing
    fn parse_detail(&self, item: &WorkItem, html: &str) -> Option<DetailFields>;

    /// Field names reported in completeness statistics
    fn fields(&self) -> Vec<String>;
}

/// Assembles the record for a fetched detail page
///
/// Detail fields win; listing hints fill the gaps. A page that yields
/// nothing still produces a record when hints exist, flagged `from_hints`.
///
/// # Returns
///
/// * `Some(ProductRecord)` - Something usable was found
/// * `None` - Neither the page nor the hints had anything (parse failure)
pub fn build_record(
    item: &WorkItem,
    source: FetchSource,
    detail: Option<DetailFields>,
) -> Option<ProductRecord> {
    let from_hints = detail.is_none();
    if from_hints && !item.has_hints() {
        return None;
    }

    let mut record = ProductRecord {
        url: item.url.clone(),
        canonical_url: canonical_key(&item.url),
        source,
        fields: detail.unwrap_or_default(),
        from_hints,
    };
    record.fill_from_hints(item);
    Some(record)
}

/// [`SiteRules`] driven by selectors from configuration
#[derive(Debug)]
pub struct ConfiguredSite {
    name: String,
    base_url: Url,
    listing_template: String,
    item_selector: Selector,
    link_selector: Selector,
    title_selector: Selector,
    price_selector: Option<Selector>,
    product_pattern: Regex,
    fields: Vec<(String, Selector)>,
}

impl ConfiguredSite {
    /// Compiles the selectors and pattern of a `[site]` section
    ///
    /// # Returns
    ///
    /// * `Ok(ConfiguredSite)` - Rules ready to use
    /// * `Err(ConfigError)` - A URL, selector or pattern is invalid
    pub fn from_config(config: &SiteConfig) -> ConfigResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        let product_pattern = Regex::new(&config.product_url_pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("{}: {}", config.product_url_pattern, e))
        })?;

        let fields = config
            .fields
            .iter()
            .map(|(name, css)| Ok((name.clone(), parse_selector(css)?)))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            name: config.name.clone(),
            base_url,
            listing_template: config.listing_url.clone(),
            item_selector: parse_selector(&config.item_selector)?,
            link_selector: parse_selector(&config.link_selector)?,
            title_selector: parse_selector(&config.title_selector)?,
            price_selector: config
                .price_selector
                .as_deref()
                .map(parse_selector)
                .transpose()?,
            product_pattern,
            fields,
        })
    }

    fn card_item(&self, card: ElementRef<'_>, page_url: &Url) -> Option<WorkItem> {
        let link = card.select(&self.link_selector).next().or_else(|| {
            // The card itself may be the anchor
            card.value().attr("href").map(|_| card)
        })?;
        let url = resolve_link(link.value().attr("href")?, page_url)?;
        if !self.is_product_url(url.as_str()) {
            return None;
        }

        let title = card
            .select(&self.title_selector)
            .next()
            .map(element_text)
            .or_else(|| link.value().attr("title").map(collapse_whitespace))
            .or_else(|| Some(element_text(link)));
        let price = self
            .price_selector
            .as_ref()
            .and_then(|sel| card.select(sel).next())
            .map(element_text);

        Some(WorkItem::new(url.as_str()).with_hints(title, price))
    }

    /// Product links anywhere on the page, for listings whose cards do not match
    fn loose_items(&self, document: &Html, page_url: &Url) -> Vec<WorkItem> {
        let Ok(anchors) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        document
            .select(&anchors)
            .filter_map(|a| {
                let url = resolve_link(a.value().attr("href")?, page_url)?;
                if !self.is_product_url(url.as_str()) {
                    return None;
                }
                let title = a
                    .value()
                    .attr("title")
                    .map(collapse_whitespace)
                    .or_else(|| Some(element_text(a)));
                Some(WorkItem::new(url.as_str()).with_hints(title, None))
            })
            .collect()
    }
}

impl SiteRules for ConfiguredSite {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn listing_url(&self, page: u32) -> Option<String> {
        let path = self.listing_template.replace("{page}", &page.to_string());
        self.base_url.join(&path).ok().map(|u| u.to_string())
    }

    fn parse_listing(&self, html: &str, page_url: &Url) -> Vec<WorkItem> {
        let document = Html::parse_document(html);

        let mut items: Vec<WorkItem> = document
            .select(&self.item_selector)
            .filter_map(|card| self.card_item(card, page_url))
            .collect();

        if items.is_empty() {
            items = self.loose_items(&document, page_url);
            if !items.is_empty() {
                tracing::debug!(
                    "No product cards matched on {}, using {} loose product links",
                    page_url,
                    items.len()
                );
            }
        }

        items
    }

    fn is_product_url(&self, url: &str) -> bool {
        self.product_pattern.is_match(url)
    }

    fn parse_detail(&self, _item: &WorkItem, html: &str) -> Option<DetailFields> {
        let document = Html::parse_document(html);
        let mut fields = DetailFields::new();

        for (name, selector) in &self.fields {
            if let Some(value) = document
                .select(selector)
                .map(field_value)
                .find(|v| !v.is_empty())
            {
                fields.insert(name.clone(), value);
            }
        }

        if let Some(product) = json_ld_product(&document) {
            for (name, value) in product {
                fields.entry(name).or_insert(value);
            }
        }

        if fields.is_empty() {
            None
        } else {
            Some(fields)
        }
    }

    fn fields(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Drops repeated product URLs, merging their hints into the first sighting
pub fn dedupe_items(items: Vec<WorkItem>) -> Vec<WorkItem> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<WorkItem> = Vec::with_capacity(items.len());

    for item in items {
        let key = canonical_key(&item.url);
        match index.get(&key) {
            Some(&pos) => unique[pos].merge_hints(&item),
            None => {
                index.insert(key, unique.len());
                unique.push(item);
            }
        }
    }

    unique
}

fn parse_selector(css: &str) -> ConfigResult<Selector> {
    Selector::parse(css)
        .map_err(|e| ConfigError::InvalidPattern(format!("selector '{}': {:?}", css, e)))
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// `content` attribute for meta-like elements, text otherwise
fn field_value(element: ElementRef<'_>) -> String {
    match element.value().attr("content") {
        Some(content) => collapse_whitespace(content),
        None => element_text(element),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `name` and `price` from the first schema.org Product in JSON-LD blocks
fn json_ld_product(document: &Html) -> Option<DetailFields> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
            continue;
        };
        if let Some(product) = find_product(&value) {
            let mut fields = DetailFields::new();
            if let Some(name) = product.get("name").and_then(json_scalar) {
                fields.insert("name".to_string(), name);
            }
            let offers = product.get("offers").map(|o| match o {
                serde_json::Value::Array(list) => list.first().unwrap_or(o),
                other => other,
            });
            if let Some(price) = offers.and_then(|o| o.get("price")).and_then(json_scalar) {
                fields.insert("price".to_string(), price);
            }
            if !fields.is_empty() {
                return Some(fields);
            }
        }
    }

    None
}

fn find_product(value: &serde_json::Value) -> Option<&serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => items.iter().find_map(find_product),
        serde_json::Value::Object(map) => {
            let is_product = match map.get("@type") {
                Some(serde_json::Value::String(t)) => t == "Product",
                Some(serde_json::Value::Array(types)) => {
                    types.iter().any(|t| t.as_str() == Some("Product"))
                }
                _ => false,
            };
            if is_product {
                Some(value)
            } else {
                map.get("@graph").and_then(find_product)
            }
        }
        _ => None,
    }
}

fn json_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(collapse_whitespace(s)),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
