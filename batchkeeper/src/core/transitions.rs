//! Ledger-owned status transitions.
//!
//! Each function mutates exactly one item (or, for the load-time passes, a
//! well-defined set of items) and never touches disk. Callers persist.

use crate::core::types::{CrashVerdict, Item, ItemStatus, LedgerState};

/// `Pending -> InProgress`.
pub fn mark_in_progress(state: &mut LedgerState, id: &str) -> Result<(), String> {
    if let Some(other) = state
        .items
        .iter()
        .find(|item| item.status == ItemStatus::InProgress && item.id != id)
    {
        return Err(format!(
            "cannot start '{id}': '{}' is already in progress",
            other.id
        ));
    }
    let item = find_mut(state, id)?;
    match item.status {
        ItemStatus::Pending => {
            item.status = ItemStatus::InProgress;
            Ok(())
        }
        other => Err(format!(
            "cannot start '{id}': status is {}",
            other.as_str()
        )),
    }
}

/// `InProgress -> Done`.
pub fn mark_done(state: &mut LedgerState, id: &str) -> Result<(), String> {
    let item = find_mut(state, id)?;
    match item.status {
        ItemStatus::InProgress => {
            item.status = ItemStatus::Done;
            Ok(())
        }
        other => Err(format!(
            "cannot complete '{id}': status is {}",
            other.as_str()
        )),
    }
}

/// Attribute one crash (or reported failure) to `id`.
///
/// Increments `crash_count`; at `max_crashes` the item becomes
/// `FailedPermanent`, otherwise it returns to `Pending`.
pub fn mark_crashed(
    state: &mut LedgerState,
    id: &str,
    diagnostic: &str,
    max_crashes: u32,
) -> Result<CrashVerdict, String> {
    let item = find_mut(state, id)?;
    match item.status {
        ItemStatus::Pending | ItemStatus::InProgress => {}
        other => {
            return Err(format!(
                "cannot attribute crash to '{id}': status is {}",
                other.as_str()
            ));
        }
    }

    // Never above the bound, never decreased (a lowered bound may leave
    // older counts above it).
    item.crash_count = item
        .crash_count
        .max(item.crash_count.saturating_add(1).min(max_crashes));
    item.last_error = Some(diagnostic.to_string());
    if item.crash_count >= max_crashes {
        item.status = ItemStatus::FailedPermanent;
        Ok(CrashVerdict::Permanent {
            crash_count: item.crash_count,
        })
    } else {
        item.status = ItemStatus::Pending;
        Ok(CrashVerdict::Retry {
            crash_count: item.crash_count,
        })
    }
}

/// Items left `InProgress` by a host that died mid-call.
pub fn in_progress_ids(state: &LedgerState) -> Vec<String> {
    state
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::InProgress)
        .map(|item| item.id.clone())
        .collect()
}

/// Force `FailedPermanent` on pending items whose crash count already meets
/// `max_crashes` (the bound was lowered between runs). Returns affected ids.
pub fn enforce_crash_bound(state: &mut LedgerState, max_crashes: u32) -> Vec<String> {
    let mut affected = Vec::new();
    for item in &mut state.items {
        if item.status == ItemStatus::Pending && item.crash_count >= max_crashes {
            item.status = ItemStatus::FailedPermanent;
            if item.last_error.is_none() {
                item.last_error = Some(format!("crash bound lowered to {max_crashes}"));
            }
            affected.push(item.id.clone());
        }
    }
    state.max_crashes = max_crashes;
    affected
}

fn find_mut<'a>(state: &'a mut LedgerState, id: &str) -> Result<&'a mut Item, String> {
    state
        .items
        .iter_mut()
        .find(|item| item.id == id)
        .ok_or_else(|| format!("unknown item '{id}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ledger_state;

    #[test]
    fn in_progress_then_done() {
        let mut state = ledger_state(&["a", "b"], 3);
        mark_in_progress(&mut state, "a").expect("start");
        assert_eq!(state.items[0].status, ItemStatus::InProgress);
        mark_done(&mut state, "a").expect("done");
        assert_eq!(state.items[0].status, ItemStatus::Done);
    }

    #[test]
    fn only_one_item_in_progress() {
        let mut state = ledger_state(&["a", "b"], 3);
        mark_in_progress(&mut state, "a").expect("start a");
        let err = mark_in_progress(&mut state, "b").unwrap_err();
        assert!(err.contains("already in progress"));
    }

    #[test]
    fn done_requires_in_progress() {
        let mut state = ledger_state(&["a"], 3);
        let err = mark_done(&mut state, "a").unwrap_err();
        assert!(err.contains("status is pending"));
    }

    #[test]
    fn crash_returns_to_pending_until_bound() {
        let mut state = ledger_state(&["a"], 3);

        for expected in 1..3 {
            mark_in_progress(&mut state, "a").expect("start");
            let verdict = mark_crashed(&mut state, "a", "boom", 3).expect("crash");
            assert_eq!(verdict, CrashVerdict::Retry { crash_count: expected });
            assert_eq!(state.items[0].status, ItemStatus::Pending);
        }

        mark_in_progress(&mut state, "a").expect("start");
        let verdict = mark_crashed(&mut state, "a", "boom again", 3).expect("crash");
        assert_eq!(verdict, CrashVerdict::Permanent { crash_count: 3 });
        assert_eq!(state.items[0].status, ItemStatus::FailedPermanent);
        assert_eq!(state.items[0].last_error.as_deref(), Some("boom again"));
    }

    #[test]
    fn crash_on_terminal_item_is_rejected() {
        let mut state = ledger_state(&["a"], 1);
        mark_in_progress(&mut state, "a").expect("start");
        mark_crashed(&mut state, "a", "boom", 1).expect("crash");
        let err = mark_crashed(&mut state, "a", "again", 1).unwrap_err();
        assert!(err.contains("failed_permanent"));
        assert_eq!(state.items[0].crash_count, 1);
    }

    #[test]
    fn lowered_bound_fails_exhausted_pending_items() {
        let mut state = ledger_state(&["a", "b"], 5);
        state.items[0].crash_count = 2;
        state.items[1].crash_count = 1;

        let affected = enforce_crash_bound(&mut state, 2);
        assert_eq!(affected, vec!["a".to_string()]);
        assert_eq!(state.items[0].status, ItemStatus::FailedPermanent);
        assert_eq!(state.items[1].status, ItemStatus::Pending);
        assert_eq!(state.max_crashes, 2);
    }

    #[test]
    fn crash_never_decreases_count_above_lowered_bound() {
        let mut state = ledger_state(&["a"], 5);
        state.items[0].crash_count = 4;
        state.items[0].status = ItemStatus::InProgress;

        let verdict = mark_crashed(&mut state, "a", "boom", 2).expect("crash");
        assert_eq!(verdict, CrashVerdict::Permanent { crash_count: 4 });
    }

    #[test]
    fn unknown_item_is_an_error() {
        let mut state = ledger_state(&["a"], 3);
        let err = mark_in_progress(&mut state, "zzz").unwrap_err();
        assert!(err.contains("unknown item"));
    }
}
