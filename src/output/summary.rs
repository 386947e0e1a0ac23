//! Run summary accounting
//!
//! The summary is built incrementally by the orchestrator and sealed in
//! FINALIZE. Every work item contributes exactly one [`ItemOutcome`].

use crate::config::SeedMode;
use crate::crawler::{BlockedEvent, ProductRecord};
use crate::state::ItemOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Statistics of one harvest run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Seed mode that actually produced the work items
    pub seed_used: SeedMode,

    /// Listing pages fetched during DISCOVER
    pub pages_visited: u32,

    /// Product links found before deduplication
    pub links_discovered: usize,

    /// Work items left after deduplication and the item budget
    pub unique_urls: usize,

    pub fetched: usize,
    pub blocked: usize,
    pub errors: usize,
    pub parse_failures: usize,

    /// Dropped items by reason code
    pub dropped: BTreeMap<String, usize>,

    /// Percentage of records carrying each field
    pub completeness: BTreeMap<String, f64>,

    /// Records after deduplication by canonical URL
    pub records: usize,

    pub blocked_events: Vec<BlockedEvent>,

    /// The operator aborted a challenge
    pub aborted: bool,

    /// The run was cancelled
    pub cancelled: bool,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(seed: SeedMode) -> Self {
        Self {
            seed_used: seed,
            pages_visited: 0,
            links_discovered: 0,
            unique_urls: 0,
            fetched: 0,
            blocked: 0,
            errors: 0,
            parse_failures: 0,
            dropped: BTreeMap::new(),
            completeness: BTreeMap::new(),
            records: 0,
            blocked_events: Vec::new(),
            aborted: false,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Counts the terminal outcome of one work item
    pub fn record_outcome(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Fetched => self.fetched += 1,
            ItemOutcome::Blocked => self.blocked += 1,
            ItemOutcome::Error => self.errors += 1,
            ItemOutcome::ParseFailed => self.parse_failures += 1,
            ItemOutcome::RobotsDenied | ItemOutcome::Cancelled => {}
        }
        if let Some(reason) = outcome.drop_reason() {
            self.record_drop(reason);
        }
    }

    /// Counts a dropped item or link under `reason`
    pub fn record_drop(&mut self, reason: &str) {
        self.record_drops(reason, 1);
    }

    pub fn record_drops(&mut self, reason: &str, count: usize) {
        if count > 0 {
            *self.dropped.entry(reason.to_string()).or_insert(0) += count;
        }
    }

    pub fn dropped_count(&self, reason: &str) -> usize {
        self.dropped.get(reason).copied().unwrap_or(0)
    }

    /// Total of all per-item outcomes counted so far
    pub fn items_accounted(&self) -> usize {
        self.fetched
            + ItemOutcome::ALL
                .iter()
                .filter_map(|o| o.drop_reason())
                .map(|reason| self.dropped_count(reason))
                .sum::<usize>()
    }

    /// Seals the summary with the final record set
    pub fn finish(&mut self, records: &[ProductRecord], fields: &[String]) {
        self.records = records.len();
        self.completeness = field_completeness(records, fields);
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }
}

/// Percentage of records with a non-blank value for each field
///
/// # Arguments
///
/// * `records` - Final, deduplicated records
/// * `fields` - Field names to report
///
/// # Returns
///
/// Field name to percentage in `[0, 100]`, rounded to one decimal; all
/// zeros when there are no records.
pub fn field_completeness(records: &[ProductRecord], fields: &[String]) -> BTreeMap<String, f64> {
    fields
        .iter()
        .map(|field| {
            let percent = if records.is_empty() {
                0.0
            } else {
                let present = records.iter().filter(|r| r.has_field(field)).count();
                (present as f64 / records.len() as f64 * 1000.0).round() / 10.0
            };
            (field.clone(), percent)
        })
        .collect()
}
