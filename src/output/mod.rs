//! Output module for run summaries and reports
//!
//! This module handles:
//! - Accounting item outcomes into a [`RunSummary`]
//! - Per-field completeness over the final records
//! - Printing the summary and exporting records (JSON lines) and the summary (JSON)

mod report;
pub mod summary;

pub use report::{print_summary, write_records, write_summary, OutputError, OutputResult};
pub use summary::{field_completeness, RunSummary};
