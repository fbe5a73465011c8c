//! Stable exit codes for batchkeeper CLI commands.

use crate::error::{BatchError, find_batch_error};

/// Command succeeded (batch drained, stopped, or report printed).
pub const OK: i32 = 0;
/// Invalid config, I/O failure, or any other unexpected error.
pub const INVALID: i32 = 1;
/// Ledger unparsable or inconsistent with the sentinel.
pub const CORRUPT_LEDGER: i32 = 2;
/// Host executable or required launch paths are missing.
pub const LAUNCH_FAILURE: i32 = 3;

/// Map an error chain to its exit code.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match find_batch_error(err) {
        Some(BatchError::CorruptLedger { .. } | BatchError::InconsistentState(_)) => {
            CORRUPT_LEDGER
        }
        Some(BatchError::LaunchFailure(_)) => LAUNCH_FAILURE,
        _ => INVALID,
    }
}
