//! Shared deterministic types for the batch core.
//!
//! These types define stable contracts between the ledger, the batch runner and
//! the watchdog. They do not depend on external state or I/O.

use serde::{Deserialize, Serialize};

/// Current on-disk ledger format.
pub const LEDGER_VERSION: u32 = 1;

/// Default bound on crash attributions per item.
pub const DEFAULT_MAX_CRASHES: u32 = 3;

/// Lifecycle of a single item in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting to be processed (possibly again, after a crash).
    Pending,
    /// Persisted right before the processor is invoked.
    InProgress,
    Done,
    /// Crash bound reached (or a QC note excluded it); never retried.
    FailedPermanent,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Done => "done",
            ItemStatus::FailedPermanent => "failed_permanent",
        }
    }
}

/// One unit of work: a single source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Stable key (source file name), unique within a batch.
    pub id: String,
    pub status: ItemStatus,
    /// Attempts attributed to a host crash or a reported failure.
    pub crash_count: u32,
    /// Diagnostic from the most recent failed attempt.
    pub last_error: Option<String>,
}

impl Item {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::Pending,
            crash_count: 0,
            last_error: None,
        }
    }

    /// File name without its final extension (`scene.v2.blend` -> `scene.v2`).
    ///
    /// A trailing dot left behind by names like `xyz..blend` is dropped too.
    pub fn stem(&self) -> &str {
        let stem = match self.id.rfind('.') {
            Some(0) | None => self.id.as_str(),
            Some(idx) => &self.id[..idx],
        };
        match stem.strip_suffix('.') {
            Some(trimmed) if !trimmed.is_empty() => trimmed,
            _ => stem,
        }
    }
}

/// Full persisted ledger document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub version: u32,
    /// RFC 3339 UTC timestamp of batch initialization.
    pub started_at: String,
    /// Item count fixed at initialization.
    pub total: usize,
    /// Crash bound in effect for this batch.
    pub max_crashes: u32,
    /// Files in the source folder that did not match the configured extensions.
    pub ignored_files: usize,
    /// Items in discovery order.
    pub items: Vec<Item>,
}

impl LedgerState {
    pub fn new(started_at: String, max_crashes: u32, items: Vec<Item>, ignored_files: usize) -> Self {
        Self {
            version: LEDGER_VERSION,
            started_at,
            total: items.len(),
            max_crashes,
            ignored_files,
            items,
        }
    }

    pub fn find(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_items(&self.items)
    }
}

/// Result reported by an item processor for one attempt.
///
/// A host crash is the third, unobservable outcome: the call never returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    Failure(String),
}

/// What `mark_crashed` did to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashVerdict {
    /// Returned to `Pending` for another attempt.
    Retry { crash_count: u32 },
    /// Crash bound reached; moved to `FailedPermanent`.
    Permanent { crash_count: u32 },
}

/// Per-status item counts.
///
/// `pending` includes in-flight items so that
/// `done + pending + failed_permanent == total` holds for every persisted write;
/// `in_progress` reports the in-flight subset separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub done: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub failed_permanent: usize,
    pub crashes: u64,
}

impl StatusCounts {
    pub fn from_items(items: &[Item]) -> Self {
        let mut counts = StatusCounts {
            total: items.len(),
            ..StatusCounts::default()
        };
        for item in items {
            counts.crashes += u64::from(item.crash_count);
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::InProgress => {
                    counts.pending += 1;
                    counts.in_progress += 1;
                }
                ItemStatus::Done => counts.done += 1,
                ItemStatus::FailedPermanent => counts.failed_permanent += 1,
            }
        }
        counts
    }

    /// True while any item still needs processing.
    pub fn has_remaining(&self) -> bool {
        self.pending > 0
    }

    pub fn is_balanced(&self) -> bool {
        self.done + self.pending + self.failed_permanent == self.total
    }
}
