/// Work item outcome definitions
///
/// Every work item submitted to the pool ends in exactly one of these.
use serde::Serialize;
use std::fmt;

/// Terminal classification of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    // ===== Success =====
    /// Detail page fetched and a record produced
    Fetched,

    // ===== Drops =====
    /// Blocked on every available path
    Blocked,

    /// Fetch failed (network, terminal status, retries exhausted, browser)
    Error,

    /// Fetched, but neither the page nor the listing hints yielded a record
    ParseFailed,

    /// Disallowed by robots.txt, never fetched
    RobotsDenied,

    /// The run was cancelled or aborted before this item finished
    Cancelled,
}

impl ItemOutcome {
    pub const ALL: [ItemOutcome; 6] = [
        Self::Fetched,
        Self::Blocked,
        Self::Error,
        Self::ParseFailed,
        Self::RobotsDenied,
        Self::Cancelled,
    ];

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Fetched)
    }

    /// Reason code under which a dropped item is counted; None for success
    pub fn drop_reason(&self) -> Option<&'static str> {
        match self {
            Self::Fetched => None,
            Self::Blocked => Some("blocked"),
            Self::Error => Some("error"),
            Self::ParseFailed => Some("parse_failed"),
            Self::RobotsDenied => Some("robots_disallowed"),
            Self::Cancelled => Some("cancelled"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.drop_reason().unwrap_or("fetched")
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
