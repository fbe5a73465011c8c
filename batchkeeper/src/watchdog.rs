//! Watchdog supervisor: `Launch -> WaitForExit -> Decide -> (Launch | Stop)`.
//!
//! The watchdog never inspects how the host ended. After every exit the
//! sentinel alone says whether to relaunch; the ledger is only read to
//! refuse relaunching a batch that has nothing left to do.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::decide::{Decision, decide};
use crate::core::types::StatusCounts;
use crate::error::BatchError;
use crate::io::config::BatchConfig;
use crate::io::init::BatchPaths;
use crate::io::launcher::{LaunchRequest, Launcher};
use crate::io::ledger_store::read_ledger;
use crate::io::sentinel::Sentinel;

/// Reason why the watchdog stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStop {
    /// The host drained the batch and removed the sentinel.
    Completed,
    /// The sentinel was removed while work remained.
    StoppedByOperator,
}

/// Summary of a watchdog run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogOutcome {
    pub launches: u32,
    pub stop: WatchdogStop,
    /// Ledger counts after the final host exit, if a ledger exists.
    pub counts: Option<StatusCounts>,
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub ledger_path: PathBuf,
    pub sentinel_path: PathBuf,
    pub relaunch_delay: Duration,
}

impl WatchdogSettings {
    pub fn from_config(cfg: &BatchConfig, paths: &BatchPaths) -> Self {
        Self {
            ledger_path: paths.ledger_path.clone(),
            sentinel_path: paths.sentinel_path.clone(),
            relaunch_delay: Duration::from_millis(cfg.host.relaunch_delay_ms),
        }
    }
}

pub struct Watchdog<'l, L: Launcher + ?Sized> {
    launcher: &'l L,
    settings: WatchdogSettings,
}

impl<'l, L: Launcher + ?Sized> Watchdog<'l, L> {
    pub fn new(launcher: &'l L, settings: WatchdogSettings) -> Self {
        Self { launcher, settings }
    }

    /// Supervise the host until the sentinel is gone.
    ///
    /// There is no relaunch cap: each relaunch follows a host exit with
    /// work remaining, and the ledger bounds crashes per item.
    #[instrument(skip_all, fields(program = %request.program.display()))]
    pub fn run(&self, request: &LaunchRequest) -> Result<WatchdogOutcome> {
        let sentinel = Sentinel::new(&self.settings.sentinel_path);
        if !sentinel.create_if_absent()? {
            info!("resuming batch with existing sentinel");
        }

        let mut launches = 0u32;
        loop {
            launches += 1;
            info!(launch = launches, "launching host");
            let exit = self
                .launcher
                .launch(request)
                .with_context(|| format!("host launch #{launches}"))?;

            let counts = read_ledger(&self.settings.ledger_path)?.map(|state| state.counts());
            let present = sentinel.is_present();
            match decide(present, counts.as_ref()) {
                Decision::Stop => {
                    let stop = match counts {
                        Some(counts) if !counts.has_remaining() => WatchdogStop::Completed,
                        _ => WatchdogStop::StoppedByOperator,
                    };
                    info!(launches, ?stop, exit_code = ?exit.code, "watchdog stopped");
                    return Ok(WatchdogOutcome {
                        launches,
                        stop,
                        counts,
                    });
                }
                Decision::Inconsistent => {
                    error!(
                        sentinel = %sentinel.path().display(),
                        "sentinel present but ledger has no remaining items"
                    );
                    return Err(BatchError::InconsistentState(format!(
                        "sentinel {} still present after host exit, but ledger {} has no remaining items",
                        sentinel.path().display(),
                        self.settings.ledger_path.display()
                    ))
                    .into());
                }
                Decision::Relaunch => {
                    if exit.is_clean() {
                        warn!("host exited cleanly without removing the sentinel");
                    } else {
                        warn!(
                            exit_code = ?exit.code,
                            timed_out = exit.timed_out,
                            "host ended abnormally"
                        );
                    }
                    if let Some(counts) = counts {
                        info!(
                            done = counts.done,
                            pending = counts.pending,
                            failed_permanent = counts.failed_permanent,
                            "relaunching"
                        );
                    }
                    if !self.settings.relaunch_delay.is_zero() {
                        thread::sleep(self.settings.relaunch_delay);
                    }
                }
            }
        }
    }
}
