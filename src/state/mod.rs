//! State module for tracking work item progress
//!
//! # Components
//!
//! - `ItemOutcome`: terminal classification of a work item (fetched, blocked, error, ...)
//! - `ItemReport`: one item's outcome with what explains it

mod item_state;

pub use item_state::ItemOutcome;

use crate::crawler::FetchSource;
use serde::Serialize;

/// Final state of one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub url: String,
    pub outcome: ItemOutcome,
    /// Path that produced the final fetch, if any fetch happened
    pub source: Option<FetchSource>,
    /// Block reason or error text
    pub detail: Option<String>,
}

impl ItemReport {
    pub fn new(url: impl Into<String>, outcome: ItemOutcome) -> Self {
        Self {
            url: url.into(),
            outcome,
            source: None,
            detail: None,
        }
    }

    pub fn with_source(mut self, source: FetchSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
