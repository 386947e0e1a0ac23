//! laprop-fetch main entry point
//!
//! This is the command-line interface for the laprop-fetch product harvester.

use clap::Parser;
use laprop_fetch::config::{load_config_with_hash, Config, SeedMode};
use laprop_fetch::crawler::harvest;
use laprop_fetch::output::{print_summary, write_records, write_summary};
use laprop_fetch::storage::CacheStore;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// laprop-fetch: a polite, resilient product-page harvester
///
/// Walks a retailer's listing pages (or its sitemaps), fetches product
/// detail pages with rate limiting, caching and retries, and escalates
/// anti-bot challenge pages to a persistent browser profile.
#[derive(Parser, Debug)]
#[command(name = "laprop-fetch")]
#[command(version = "1.0.0")]
#[command(about = "A polite, resilient product-page harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Override where work items come from
    #[arg(long, value_enum)]
    seed: Option<SeedMode>,

    /// Disable browser escalation
    #[arg(long, conflicts_with = "headless")]
    no_browser: bool,

    /// Run the escalation browser headless (no manual challenge solving)
    #[arg(long)]
    headless: bool,

    /// Neither read nor write the page cache
    #[arg(long)]
    no_cache: bool,

    /// Validate config and show the effective settings without fetching
    #[arg(long, conflicts_with = "clear_cache")]
    dry_run: bool,

    /// Remove all cached pages, blocked dumps and screenshots, then exit
    #[arg(long, conflicts_with = "dry_run")]
    clear_cache: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    apply_overrides(&mut config, &cli);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.clear_cache {
        handle_clear_cache(&config)?;
    } else {
        handle_harvest(&config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("laprop_fetch=info,warn"),
            1 => EnvFilter::new("laprop_fetch=debug,info"),
            2 => EnvFilter::new("laprop_fetch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Applies command-line switches on top of the file configuration
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(seed) = cli.seed {
        config.crawl.seed = seed;
    }
    if cli.no_browser {
        config.browser.enabled = false;
    }
    if cli.headless {
        config.browser.headless = true;
    }
    if cli.no_cache {
        config.cache.read_enabled = false;
        config.cache.write_enabled = false;
    }
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== laprop-fetch Dry Run ===\n");

    println!("Site:");
    println!("  Name: {}", config.site.name);
    println!("  Base URL: {}", config.site.base_url);
    println!("  Listing: {}", config.site.listing_url);
    println!("  Product pattern: {}", config.site.product_url_pattern);
    match &config.site.sitemap_url {
        Some(url) => println!("  Sitemap: {}", url),
        None => println!("  Sitemap: from robots.txt"),
    }
    println!("  Fields: {}", config.site.fields.keys().cloned().collect::<Vec<_>>().join(", "));

    println!("\nCrawl:");
    println!("  Seed: {}", config.crawl.seed);
    println!("  Max pages: {}", config.crawl.max_pages);
    if config.crawl.max_items == 0 {
        println!("  Max items: unlimited");
    } else {
        println!("  Max items: {}", config.crawl.max_items);
    }
    println!("  Workers: {}", config.crawl.workers);
    println!("  Respect robots.txt: {}", config.crawl.respect_robots);

    println!("\nFetch:");
    println!(
        "  Delay: {:.2}s - {:.2}s",
        config.fetch.min_delay, config.fetch.max_delay
    );
    println!("  Attempts: {}", config.fetch.retries);
    println!("  Timeout: {}s", config.fetch.timeout);
    println!("  Retry statuses: {:?}", config.fetch.retry_statuses);

    println!("\nBrowser:");
    if config.browser.enabled {
        println!("  Headless: {}", config.browser.headless);
        println!("  Challenge wait: {}s", config.browser.challenge_wait);
        println!("  Profile: {}", config.browser.profile_dir);
    } else {
        println!("  Disabled");
    }

    println!("\nCache:");
    println!("  Directory: {}", config.cache.dir);
    println!(
        "  Read: {}, Write: {}",
        config.cache.read_enabled, config.cache.write_enabled
    );

    println!("\n✓ Configuration is valid");
}

/// Handles the --clear-cache mode
fn handle_clear_cache(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let cache = CacheStore::open(config.cache.dir(), true, false)?;
    let removed = cache.clear()?;
    println!("✓ Removed {} file(s) from {}", removed, cache.base_dir().display());
    Ok(())
}

/// Handles the main harvest
async fn handle_harvest(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing up");
            ctrl_c.cancel();
        }
    });

    let output = match harvest(config, &cancel).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("Harvest setup failed: {}", e);
            return Err(e.into());
        }
    };

    print_summary(&output.summary);

    if let Some(path) = &config.output.records_path {
        write_records(&output.records, Path::new(path))?;
    }
    if let Some(path) = &config.output.summary_path {
        write_summary(&output.summary, Path::new(path))?;
    }

    Ok(())
}
