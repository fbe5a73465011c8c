//! Watchdog decision after a host exit.

use crate::core::types::StatusCounts;

/// What the watchdog does after the host process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Sentinel still present: the host ended abnormally, launch again.
    Relaunch,
    /// Sentinel absent: the batch drained or an operator stopped it.
    Stop,
    /// Sentinel present yet the ledger has nothing left to process.
    Inconsistent,
}

/// Decide the next watchdog transition.
///
/// Only the sentinel decides between relaunch and stop. `ledger` is the
/// post-exit ledger summary when one exists; it is consulted solely to
/// refuse relaunching a batch that the ledger says is already finished.
pub fn decide(sentinel_present: bool, ledger: Option<&StatusCounts>) -> Decision {
    if !sentinel_present {
        return Decision::Stop;
    }
    match ledger {
        Some(counts) if !counts.has_remaining() => Decision::Inconsistent,
        _ => Decision::Relaunch,
    }
}
