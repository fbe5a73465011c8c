//! Deterministic selection of the next item to process.

use crate::core::types::{Item, ItemStatus, LedgerState};

/// First `Pending` item in discovery order.
///
/// Returns `None` once the queue is exhausted.
pub fn next_eligible(state: &LedgerState) -> Option<&Item> {
    state
        .items
        .iter()
        .find(|item| item.status == ItemStatus::Pending)
}
