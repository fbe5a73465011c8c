//! Structural checks run on every ledger loaded from disk.

use std::collections::HashSet;

use crate::core::types::{ItemStatus, LEDGER_VERSION, LedgerState};

/// Validate ledger invariants, returning human-readable violations.
pub fn validate_invariants(state: &LedgerState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.version != LEDGER_VERSION {
        errors.push(format!(
            "unsupported ledger version {} (expected {LEDGER_VERSION})",
            state.version
        ));
    }
    if state.max_crashes == 0 {
        errors.push("max_crashes must be > 0".to_string());
    }
    if state.total != state.items.len() {
        errors.push(format!(
            "total {} does not match {} recorded items",
            state.total,
            state.items.len()
        ));
    }

    let mut seen = HashSet::new();
    let mut in_progress = 0usize;
    for item in &state.items {
        if item.id.trim().is_empty() {
            errors.push("item id must be non-empty".to_string());
        }
        if !seen.insert(item.id.as_str()) {
            errors.push(format!("duplicate id: {}", item.id));
        }
        if item.status == ItemStatus::InProgress {
            in_progress += 1;
        }
        // Terminal items keep the count they finished with, even above a
        // bound lowered later.
        let open = matches!(item.status, ItemStatus::Pending | ItemStatus::InProgress);
        if open && item.crash_count > state.max_crashes {
            errors.push(format!(
                "item {} has crash_count {} above max_crashes {}",
                item.id, item.crash_count, state.max_crashes
            ));
        }
    }
    if in_progress > 1 {
        errors.push(format!("{in_progress} items are in progress (at most 1)"));
    }

    errors
}
