//! Configuration module for laprop-fetch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use laprop_fetch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("teknosa.toml")).unwrap();
//! println!("Walking {} listing pages", config.crawl.max_pages);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BlockingConfig, BrowserSettings, CacheConfig, Config, CrawlConfig, FetchConfig, OutputConfig,
    SeedMode, SiteConfig, DEFAULT_ACCEPT_LANGUAGE, DEFAULT_USER_AGENT,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
