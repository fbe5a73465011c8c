//! In-host batch runner: `Idle -> Running -> Draining -> Finished`.
//!
//! Walks the ledger one item at a time. Each item is persisted as
//! `InProgress` before the processor is called, so a host that dies inside
//! the call leaves evidence for the next load to charge the crash to.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::{CrashVerdict, ItemOutcome, StatusCounts};
use crate::error::BatchError;
use crate::io::config::BatchConfig;
use crate::io::init::BatchPaths;
use crate::io::processor::ItemProcessor;
use crate::io::qc_notes::QcNotes;
use crate::io::sentinel::Sentinel;
use crate::ledger::{Ledger, Seed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Draining,
    Finished,
}

/// Reason why `BatchRunner::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStop {
    /// No eligible item left; the sentinel was removed.
    Exhausted,
    /// The sentinel disappeared between items (operator `stop`).
    StopRequested,
}

/// What one host session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Items handed to the processor in this session.
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Items charged with a crash on load.
    pub recovered: Vec<String>,
    pub stop: RunStop,
    pub counts: StatusCounts,
}

/// Files the runner reads and writes.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub ledger_path: PathBuf,
    pub sentinel_path: PathBuf,
    pub qc_dir: PathBuf,
    pub max_crashes: u32,
}

impl RunnerSettings {
    pub fn from_config(cfg: &BatchConfig, paths: &BatchPaths) -> Self {
        Self {
            ledger_path: paths.ledger_path.clone(),
            sentinel_path: paths.sentinel_path.clone(),
            qc_dir: paths.qc_dir.clone(),
            max_crashes: cfg.batch.max_crashes,
        }
    }
}

pub struct BatchRunner<'p, P: ItemProcessor + ?Sized> {
    settings: RunnerSettings,
    processor: &'p P,
    sentinel: Sentinel,
    qc_notes: QcNotes,
    state: RunnerState,
}

impl<'p, P: ItemProcessor + ?Sized> BatchRunner<'p, P> {
    pub fn new(settings: RunnerSettings, processor: &'p P) -> Self {
        Self {
            sentinel: Sentinel::new(&settings.sentinel_path),
            qc_notes: QcNotes::new(&settings.qc_dir),
            settings,
            processor,
            state: RunnerState::Idle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Process the batch until it is exhausted or an operator stops it.
    ///
    /// Only ledger and sentinel I/O errors escape; a failing
    /// processor is charged to its item and the loop moves on.
    #[instrument(skip_all, fields(ledger = %self.settings.ledger_path.display()))]
    pub fn run<F>(&mut self, seed: F) -> Result<RunSummary>
    where
        F: FnOnce() -> Result<Seed>,
    {
        self.state = RunnerState::Running;
        let mut ledger = Ledger::load(&self.settings.ledger_path, self.settings.max_crashes, seed)
            .context("load ledger")?;

        let mut recovered = Vec::new();
        for entry in ledger.recovered() {
            self.report_crash(&ledger, &entry.id, entry.verdict);
            recovered.push(entry.id.clone());
        }

        let mut processed = 0u32;
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        loop {
            let Some(item) = ledger.next_eligible().cloned() else {
                break;
            };
            if !self.sentinel.is_present() {
                info!(next = %item.id, "sentinel removed, stopping before next item");
                self.state = RunnerState::Finished;
                return Ok(RunSummary {
                    processed,
                    succeeded,
                    failed,
                    recovered,
                    stop: RunStop::StopRequested,
                    counts: ledger.counts(),
                });
            }

            ledger.mark_in_progress(&item.id)?;
            processed += 1;
            info!(item = %item.id, attempt = item.crash_count + 1, "item started");

            let outcome = match self.processor.process(&item) {
                Ok(outcome) => outcome,
                Err(err) => ItemOutcome::Failure(format!("{err:#}")),
            };
            match outcome {
                ItemOutcome::Success => {
                    ledger.mark_done(&item.id)?;
                    succeeded += 1;
                    info!(item = %item.id, "item done");
                }
                ItemOutcome::Failure(diagnostic) => {
                    let verdict = ledger.mark_crashed(&item.id, &diagnostic)?;
                    failed += 1;
                    warn!(item = %item.id, %diagnostic, "item failed");
                    if let CrashVerdict::Permanent { .. } = verdict {
                        self.report_crash(&ledger, &item.id, verdict);
                    }
                }
            }
        }

        self.state = RunnerState::Draining;
        if self.sentinel.remove()? {
            info!("batch exhausted, sentinel removed");
        }
        self.state = RunnerState::Finished;
        let counts = ledger.counts();
        info!(
            processed,
            done = counts.done,
            failed_permanent = counts.failed_permanent,
            "batch finished"
        );
        Ok(RunSummary {
            processed,
            succeeded,
            failed,
            recovered,
            stop: RunStop::Exhausted,
            counts,
        })
    }

    /// Log a crash attribution; a permanent one also gets a QC note.
    fn report_crash(&self, ledger: &Ledger, id: &str, verdict: CrashVerdict) {
        let item = ledger.state().find(id);
        let diagnostic = item
            .and_then(|item| item.last_error.clone())
            .unwrap_or_default();
        match verdict {
            CrashVerdict::Retry { crash_count } => {
                let err = BatchError::ItemCrash {
                    id: id.to_string(),
                    crash_count,
                };
                warn!(error = %err, "item will be retried");
            }
            CrashVerdict::Permanent { crash_count } => {
                let err = BatchError::ItemPermanentFailure {
                    id: id.to_string(),
                    crash_count,
                    diagnostic: diagnostic.clone(),
                };
                warn!(error = %err, "item excluded from batch");
                // Best effort: the ledger already records the failure.
                match self.qc_notes.write_if_absent(id, &diagnostic) {
                    Ok(true) => {
                        info!(path = %self.qc_notes.note_path(id).display(), "qc note written");
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(item = %id, error = %format!("{err:#}"), "qc note not written");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ItemStatus;
    use crate::test_support::{ScriptedProcessor, ScriptedStep};

    fn settings(root: &std::path::Path, max_crashes: u32) -> RunnerSettings {
        RunnerSettings {
            ledger_path: root.join("ledger.json"),
            sentinel_path: root.join("restart_until_finished.txt"),
            qc_dir: root.join("qc_errors"),
            max_crashes,
        }
    }

    #[test]
    fn drains_batch_and_removes_sentinel() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path(), 3);
        let sentinel = Sentinel::new(&settings.sentinel_path);
        sentinel.create_if_absent().expect("sentinel");

        let processor = ScriptedProcessor::new(vec![
            ScriptedStep::Succeed,
            ScriptedStep::Fail("bad normals".to_string()),
            ScriptedStep::Succeed,
        ]);
        let mut runner = BatchRunner::new(settings, &processor);
        assert_eq!(runner.state(), RunnerState::Idle);
        let summary = runner
            .run(|| Ok(Seed::pending(["a", "b"])))
            .expect("run");

        assert_eq!(runner.state(), RunnerState::Finished);
        assert_eq!(summary.stop, RunStop::Exhausted);
        assert_eq!((summary.processed, summary.succeeded, summary.failed), (3, 2, 1));
        assert_eq!(summary.counts.done, 2);
        assert!(!sentinel.is_present());
        assert_eq!(processor.calls(), vec!["a", "b", "b"]);
    }

    #[test]
    fn permanent_failure_writes_qc_note() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path(), 1);
        Sentinel::new(&settings.sentinel_path)
            .create_if_absent()
            .expect("sentinel");
        let notes = QcNotes::new(&settings.qc_dir);

        let processor = ScriptedProcessor::new(vec![ScriptedStep::Fail(
            "render not found after complete".to_string(),
        )]);
        let summary = BatchRunner::new(settings, &processor)
            .run(|| Ok(Seed::pending(["a.blend"])))
            .expect("run");

        assert_eq!(summary.counts.failed_permanent, 1);
        assert_eq!(
            notes.read("a.blend").expect("read").as_deref(),
            Some("render not found after complete")
        );
    }

    #[test]
    fn unwritable_qc_dir_does_not_fail_the_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path(), 1);
        std::fs::write(&settings.qc_dir, "not a directory").expect("block qc dir");
        Sentinel::new(&settings.sentinel_path)
            .create_if_absent()
            .expect("sentinel");
        let ledger_path = settings.ledger_path.clone();

        let processor = ScriptedProcessor::new(vec![ScriptedStep::Fail("bad uv".to_string())]);
        let summary = BatchRunner::new(settings, &processor)
            .run(|| Ok(Seed::pending(["a.blend", "b.blend"])))
            .expect("run");

        assert_eq!(summary.counts.failed_permanent, 1);
        assert_eq!(summary.counts.done, 1);
        let state = crate::io::ledger_store::read_ledger(&ledger_path)
            .expect("read")
            .expect("present");
        assert_eq!(
            state.find("a.blend").expect("item").status,
            ItemStatus::FailedPermanent
        );
    }

    #[test]
    fn processor_error_is_absorbed_as_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path(), 3);
        let ledger_path = settings.ledger_path.clone();
        Sentinel::new(&settings.sentinel_path)
            .create_if_absent()
            .expect("sentinel");

        let processor = ScriptedProcessor::new(vec![
            ScriptedStep::Error("spawn failed".to_string()),
            ScriptedStep::Succeed,
        ]);
        let summary = BatchRunner::new(settings, &processor)
            .run(|| Ok(Seed::pending(["a"])))
            .expect("run");

        assert_eq!(summary.counts.done, 1);
        let ledger = Ledger::load(&ledger_path, 3, || Ok(Seed::default())).expect("load");
        let item = ledger.state().find("a").expect("item");
        assert_eq!(item.crash_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("spawn failed"));
    }

    #[test]
    fn missing_sentinel_stops_before_next_item() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path(), 3);
        let ledger_path = settings.ledger_path.clone();
        let sentinel = Sentinel::new(&settings.sentinel_path);
        sentinel.create_if_absent().expect("sentinel");

        let processor = ScriptedProcessor::new(vec![
            ScriptedStep::Succeed,
            ScriptedStep::RemoveSentinelThenSucceed(settings.sentinel_path.clone()),
        ]);
        let summary = BatchRunner::new(settings, &processor)
            .run(|| Ok(Seed::pending(["a", "b", "c"])))
            .expect("run");

        assert_eq!(summary.stop, RunStop::StopRequested);
        assert_eq!(summary.processed, 2);
        let ledger = Ledger::load(&ledger_path, 3, || Ok(Seed::default())).expect("load");
        assert_eq!(ledger.state().find("c").expect("c").status, ItemStatus::Pending);
    }

    #[test]
    fn empty_batch_finishes_immediately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path(), 3);
        let sentinel = Sentinel::new(&settings.sentinel_path);
        sentinel.create_if_absent().expect("sentinel");

        let processor = ScriptedProcessor::new(Vec::new());
        let summary = BatchRunner::new(settings, &processor)
            .run(|| Ok(Seed::default()))
            .expect("run");

        assert_eq!(summary.stop, RunStop::Exhausted);
        assert_eq!(summary.counts.total, 0);
        assert!(!sentinel.is_present());
    }
}
