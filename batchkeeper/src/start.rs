//! Orchestration for `batchkeeper start` and `batchkeeper stop`.
//!
//! `start` validates launch prerequisites, then hands control to the
//! watchdog until the batch drains or the sentinel is removed. `stop` only
//! removes the sentinel; the running host finishes its current item and the
//! watchdog does not relaunch it.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::io::config::load_config;
use crate::io::init::BatchPaths;
use crate::io::launcher::{Launcher, ProcessLauncher, host_launch_request};
use crate::io::ledger_store::read_ledger;
use crate::io::processor::CommandProcessor;
use crate::io::sentinel::Sentinel;
use crate::watchdog::{Watchdog, WatchdogOutcome, WatchdogSettings};

/// Start (or resume) the batch described by `config_path` with real processes.
pub fn start_batch(config_path: &Path) -> Result<WatchdogOutcome> {
    let self_exe = env::current_exe().context("locate batchkeeper executable")?;
    start_batch_with(config_path, &ProcessLauncher, &self_exe)
}

/// Like [`start_batch`], with an explicit launcher and default host binary.
pub fn start_batch_with<L: Launcher + ?Sized>(
    config_path: &Path,
    launcher: &L,
    self_exe: &Path,
) -> Result<WatchdogOutcome> {
    let cfg = load_config(config_path)?;
    let paths = BatchPaths::resolve(config_path, &cfg);
    let request = host_launch_request(&cfg, &paths, self_exe)?;
    if paths.host_executable.is_none() {
        // The default host is this binary; its processor config must hold up.
        CommandProcessor::from_config(&cfg, &paths)?;
    }

    // Refuse to supervise a batch whose ledger cannot be trusted.
    if let Some(state) = read_ledger(&paths.ledger_path)? {
        let counts = state.counts();
        info!(
            total = counts.total,
            done = counts.done,
            pending = counts.pending,
            failed_permanent = counts.failed_permanent,
            "resuming existing ledger"
        );
    }

    Watchdog::new(launcher, WatchdogSettings::from_config(&cfg, &paths)).run(&request)
}

/// Remove the sentinel. Returns `true` if it was present.
pub fn stop_batch(config_path: &Path) -> Result<bool> {
    let cfg = load_config(config_path)?;
    let paths = BatchPaths::resolve(config_path, &cfg);
    let removed = Sentinel::new(&paths.sentinel_path).remove()?;
    if removed {
        info!(path = %paths.sentinel_path.display(), "stop requested");
    }
    Ok(removed)
}
