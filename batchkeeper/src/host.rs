//! `batchkeeper host`: the in-host entry point launched by the watchdog.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::types::{Item, ItemStatus};
use crate::io::config::{BatchConfig, load_config};
use crate::io::init::BatchPaths;
use crate::io::processor::CommandProcessor;
use crate::io::qc_notes::QcNotes;
use crate::io::source::list_source_items;
use crate::ledger::Seed;
use crate::runner::{BatchRunner, RunSummary, RunnerSettings};

/// Build the initial item set from the source folder.
///
/// Items with an existing QC note start `FailedPermanent` (the note becomes
/// `last_error`); items whose outputs already exist start `Done`.
pub fn seed_from_source<F>(cfg: &BatchConfig, paths: &BatchPaths, outputs_exist: F) -> Result<Seed>
where
    F: Fn(&Item) -> Result<bool>,
{
    let listing = list_source_items(&paths.source_dir, &cfg.batch.extensions)?;
    let notes = QcNotes::new(&paths.qc_dir);
    let mut items = Vec::with_capacity(listing.items.len());
    for id in listing.items {
        let mut item = Item::pending(id);
        if let Some(note) = notes.read(&item.id)? {
            debug!(item = %item.id, "qc note present, excluding");
            item.status = ItemStatus::FailedPermanent;
            item.last_error = Some(note);
        } else if outputs_exist(&item)? {
            debug!(item = %item.id, "outputs present, skipping");
            item.status = ItemStatus::Done;
        }
        items.push(item);
    }
    Ok(Seed {
        items,
        ignored_files: listing.ignored,
    })
}

/// Run one host session against the batch described by `config_path`.
pub fn run_host(config_path: &Path) -> Result<RunSummary> {
    let cfg = load_config(config_path)?;
    let paths = BatchPaths::resolve(config_path, &cfg);
    let processor = CommandProcessor::from_config(&cfg, &paths)?;
    let settings = RunnerSettings::from_config(&cfg, &paths);

    let summary = BatchRunner::new(settings, &processor)
        .run(|| seed_from_source(&cfg, &paths, |item| processor.outputs_exist(item)))
        .context("host session")?;
    info!(
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        recovered = summary.recovered.len(),
        stop = ?summary.stop,
        "host session finished"
    );
    Ok(summary)
}
