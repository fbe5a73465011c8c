//! Batch failure taxonomy.
//!
//! Operational code returns `anyhow::Result`; these variants are attached at
//! the point of failure and recovered with `downcast_ref` wherever a caller
//! must branch on the kind (exit codes, watchdog decisions).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    /// Ledger file exists but cannot be trusted; the batch refuses to guess.
    #[error("corrupt ledger {}: {reason}", path.display())]
    CorruptLedger { path: PathBuf, reason: String },

    /// Sentinel and ledger disagree (e.g. sentinel present, queue exhausted).
    #[error("inconsistent batch state: {0}")]
    InconsistentState(String),

    /// Host terminated while an item was in progress.
    #[error("host crashed while processing {id} (crash {crash_count})")]
    ItemCrash { id: String, crash_count: u32 },

    /// Item reached the crash bound and will not be retried.
    #[error("{id} failed permanently after {crash_count} crashes: {diagnostic}")]
    ItemPermanentFailure {
        id: String,
        crash_count: u32,
        diagnostic: String,
    },

    /// Host executable or a required path is missing.
    #[error("launch failure: {0}")]
    LaunchFailure(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl BatchError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BatchError::CorruptLedger {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Find a `BatchError` anywhere in an `anyhow` chain.
pub fn find_batch_error(err: &anyhow::Error) -> Option<&BatchError> {
    err.chain().find_map(|cause| cause.downcast_ref::<BatchError>())
}
