//! Durable progress ledger.
//!
//! Wraps [`LedgerState`] with its file path so that every transition is
//! persisted before the call returns. The batch runner is the only writer.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::core::selector;
use crate::core::transitions;
use crate::core::types::{CrashVerdict, Item, LedgerState, StatusCounts};
use crate::io::ledger_store::{read_ledger, write_ledger};

/// Diagnostic recorded for an item found `InProgress` at load time.
pub const HOST_DIED_DIAGNOSTIC: &str = "host terminated while the item was in progress";

/// Initial item set for a ledger that does not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Seed {
    /// Items in discovery order. Usually all `Pending`, but pre-existing
    /// outputs or QC notes may seed `Done` / `FailedPermanent` entries.
    pub items: Vec<Item>,
    pub ignored_files: usize,
}

impl Seed {
    pub fn pending<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: ids.into_iter().map(Item::pending).collect(),
            ignored_files: 0,
        }
    }
}

/// An item whose in-flight attempt was attributed to a host crash on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredItem {
    pub id: String,
    pub verdict: CrashVerdict,
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    state: LedgerState,
    recovered: Vec<RecoveredItem>,
}

impl Ledger {
    /// Load the ledger at `path`, creating it from `seed` if absent.
    ///
    /// `seed` is only called when no ledger exists. Items left `InProgress`
    /// by a dead host are charged one crash each, and a lowered
    /// `max_crashes` retires pending items already at the new bound. Any
    /// such repair is persisted before this returns.
    pub fn load<F>(path: &Path, max_crashes: u32, seed: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Seed>,
    {
        let (mut state, mut dirty) = match read_ledger(path)? {
            Some(state) => (state, false),
            None => {
                let seed = seed()?;
                let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                let state =
                    LedgerState::new(started_at, max_crashes, seed.items, seed.ignored_files);
                info!(
                    path = %path.display(),
                    total = state.total,
                    ignored_files = state.ignored_files,
                    "ledger created"
                );
                (state, true)
            }
        };

        if state.max_crashes != max_crashes {
            let retired = transitions::enforce_crash_bound(&mut state, max_crashes);
            info!(max_crashes, retired = retired.len(), "crash bound changed");
            dirty = true;
        }

        let mut recovered = Vec::new();
        for id in transitions::in_progress_ids(&state) {
            let verdict =
                transitions::mark_crashed(&mut state, &id, HOST_DIED_DIAGNOSTIC, max_crashes)
                    .map_err(|err| anyhow!(err))?;
            warn!(item = %id, ?verdict, "recovered item interrupted by host crash");
            recovered.push(RecoveredItem { id, verdict });
            dirty = true;
        }

        let ledger = Self {
            path: path.to_path_buf(),
            state,
            recovered,
        };
        if dirty {
            ledger.persist()?;
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn counts(&self) -> StatusCounts {
        self.state.counts()
    }

    /// Crash attributions made by `load`.
    pub fn recovered(&self) -> &[RecoveredItem] {
        &self.recovered
    }

    pub fn next_eligible(&self) -> Option<&Item> {
        selector::next_eligible(&self.state)
    }

    pub fn mark_in_progress(&mut self, id: &str) -> Result<()> {
        transitions::mark_in_progress(&mut self.state, id).map_err(|err| anyhow!(err))?;
        self.persist()
    }

    pub fn mark_done(&mut self, id: &str) -> Result<()> {
        transitions::mark_done(&mut self.state, id).map_err(|err| anyhow!(err))?;
        self.persist()
    }

    pub fn mark_crashed(&mut self, id: &str, diagnostic: &str) -> Result<CrashVerdict> {
        let max_crashes = self.state.max_crashes;
        let verdict = transitions::mark_crashed(&mut self.state, id, diagnostic, max_crashes)
            .map_err(|err| anyhow!(err))?;
        self.persist()?;
        Ok(verdict)
    }

    /// Atomically replace the on-disk ledger with the in-memory state.
    pub fn persist(&self) -> Result<()> {
        write_ledger(&self.path, &self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ItemStatus;

    fn no_seed() -> Result<Seed> {
        Err(anyhow!("seed must not be called for an existing ledger"))
    }

    #[test]
    fn absent_ledger_is_seeded_and_persisted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.json");

        let ledger =
            Ledger::load(&path, 3, || Ok(Seed::pending(["a.blend", "b.blend"]))).expect("load");
        assert_eq!(ledger.state().total, 2);
        assert!(path.is_file());
        assert!(ledger.recovered().is_empty());

        let reloaded = Ledger::load(&path, 3, no_seed).expect("reload");
        assert_eq!(reloaded.state(), ledger.state());
    }

    #[test]
    fn consecutive_loads_are_identical() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.json");
        let mut ledger =
            Ledger::load(&path, 3, || Ok(Seed::pending(["a", "b", "c"]))).expect("load");
        ledger.mark_in_progress("a").expect("start");
        ledger.mark_done("a").expect("done");

        let first = Ledger::load(&path, 3, no_seed).expect("first");
        let second = Ledger::load(&path, 3, no_seed).expect("second");
        assert_eq!(first.state(), second.state());
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            serde_json::to_string_pretty(second.state()).expect("serialize") + "\n"
        );
    }

    #[test]
    fn in_progress_item_is_charged_exactly_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.json");
        let mut ledger = Ledger::load(&path, 3, || Ok(Seed::pending(["a", "b"]))).expect("load");
        ledger.mark_in_progress("b").expect("start");
        drop(ledger);

        let recovered = Ledger::load(&path, 3, no_seed).expect("recover");
        assert_eq!(
            recovered.recovered(),
            &[RecoveredItem {
                id: "b".to_string(),
                verdict: CrashVerdict::Retry { crash_count: 1 },
            }]
        );
        let item = recovered.state().find("b").expect("item");
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.crash_count, 1);
        assert_eq!(item.last_error.as_deref(), Some(HOST_DIED_DIAGNOSTIC));

        let again = Ledger::load(&path, 3, no_seed).expect("reload");
        assert!(again.recovered().is_empty());
        assert_eq!(again.state().find("b").expect("item").crash_count, 1);
    }

    #[test]
    fn recovery_at_the_bound_fails_the_item() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.json");
        let mut ledger = Ledger::load(&path, 2, || Ok(Seed::pending(["a"]))).expect("load");
        ledger.mark_in_progress("a").expect("start");
        ledger.mark_crashed("a", "boom").expect("crash");
        ledger.mark_in_progress("a").expect("restart");
        drop(ledger);

        let recovered = Ledger::load(&path, 2, no_seed).expect("recover");
        let item = recovered.state().find("a").expect("item");
        assert_eq!(item.status, ItemStatus::FailedPermanent);
        assert_eq!(item.crash_count, 2);
        assert!(recovered.next_eligible().is_none());
    }

    #[test]
    fn lowered_bound_is_applied_on_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.json");
        let mut ledger = Ledger::load(&path, 5, || Ok(Seed::pending(["a", "b"]))).expect("load");
        for _ in 0..2 {
            ledger.mark_in_progress("a").expect("start");
            ledger.mark_crashed("a", "boom").expect("crash");
        }
        drop(ledger);

        let lowered = Ledger::load(&path, 2, no_seed).expect("reload");
        assert_eq!(lowered.state().max_crashes, 2);
        assert_eq!(
            lowered.state().find("a").expect("item").status,
            ItemStatus::FailedPermanent
        );
        assert_eq!(lowered.next_eligible().map(|item| item.id.as_str()), Some("b"));
    }

    #[test]
    fn lowered_bound_keeps_done_items_loadable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.json");
        let mut ledger = Ledger::load(&path, 5, || Ok(Seed::pending(["a", "b"]))).expect("load");
        for _ in 0..2 {
            ledger.mark_in_progress("a").expect("start");
            ledger.mark_crashed("a", "boom").expect("crash");
        }
        ledger.mark_in_progress("a").expect("start");
        ledger.mark_done("a").expect("done");
        drop(ledger);

        for _ in 0..2 {
            let lowered = Ledger::load(&path, 1, no_seed).expect("reload");
            let item = lowered.state().find("a").expect("item");
            assert_eq!(item.status, ItemStatus::Done);
            assert_eq!(item.crash_count, 2);
            assert_eq!(lowered.state().max_crashes, 1);
        }
    }

    #[test]
    fn every_persisted_write_is_balanced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ledger.json");
        let mut ledger =
            Ledger::load(&path, 1, || Ok(Seed::pending(["a", "b", "c"]))).expect("load");

        let on_disk = |path: &Path| {
            read_ledger(path)
                .expect("read")
                .expect("present")
                .counts()
        };
        ledger.mark_in_progress("a").expect("start");
        assert!(on_disk(&path).is_balanced());
        ledger.mark_done("a").expect("done");
        assert!(on_disk(&path).is_balanced());
        ledger.mark_in_progress("b").expect("start");
        ledger.mark_crashed("b", "boom").expect("crash");
        let counts = on_disk(&path);
        assert!(counts.is_balanced());
        assert_eq!((counts.done, counts.pending, counts.failed_permanent), (1, 1, 1));
    }
}
