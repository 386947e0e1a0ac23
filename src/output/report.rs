//! Console and file reports of a finished run

use crate::crawler::ProductRecord;
use crate::output::summary::RunSummary;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to serialize output: {0}")]
    Format(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Prints the summary to stdout
///
/// # Arguments
///
/// * `summary` - The sealed run summary
pub fn print_summary(summary: &RunSummary) {
    println!("=== Harvest Summary ===\n");

    println!("Overview:");
    println!("  Seed used: {}", summary.seed_used);
    println!("  Listing pages visited: {}", summary.pages_visited);
    println!("  Links discovered: {}", summary.links_discovered);
    println!("  Unique URLs: {}", summary.unique_urls);
    println!("  Records: {}", summary.records);
    if let Some(duration) = summary.duration_seconds() {
        println!("  Duration: {}s", duration);
    }
    println!();

    println!("Items:");
    println!("  Fetched: {}", summary.fetched);
    println!("  Blocked: {}", summary.blocked);
    println!("  Errors: {}", summary.errors);
    println!("  Parse failures: {}", summary.parse_failures);
    println!();

    if !summary.dropped.is_empty() {
        println!("Dropped:");
        let mut drops: Vec<_> = summary.dropped.iter().collect();
        drops.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (reason, count) in drops {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    if !summary.completeness.is_empty() {
        println!("Field completeness:");
        for (field, percent) in &summary.completeness {
            println!("  {}: {:.1}%", field, percent);
        }
        println!();
    }

    if !summary.blocked_events.is_empty() {
        println!("Blocked ({}):", summary.blocked_events.len());
        for event in &summary.blocked_events {
            println!(
                "  [{}] {} via {}: {}",
                event.step, event.reason, event.source, event.url
            );
            for path in event.artifact_paths() {
                println!("      {}", path.display());
            }
        }
        println!();
    }

    if summary.aborted {
        println!("Run aborted by operator.");
    }
    if summary.cancelled {
        println!("Run cancelled.");
    }
}

/// Writes records as JSON lines, one record per line
pub fn write_records(records: &[ProductRecord], path: &Path) -> OutputResult<()> {
    ensure_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    tracing::info!("Wrote {} record(s) to {}", records.len(), path.display());
    Ok(())
}

/// Writes the summary as pretty-printed JSON
pub fn write_summary(summary: &RunSummary, path: &Path) -> OutputResult<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json)?;
    tracing::info!("Wrote summary to {}", path.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
