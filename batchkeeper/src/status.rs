//! `batchkeeper status` report.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::core::types::{ItemStatus, StatusCounts};
use crate::io::config::load_config;
use crate::io::init::BatchPaths;
use crate::io::ledger_store::read_ledger;
use crate::io::sentinel::Sentinel;

/// A permanently failed item and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub id: String,
    pub crash_count: u32,
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub sentinel_present: bool,
    pub ledger_present: bool,
    pub started_at: Option<String>,
    /// Seconds since `started_at`; `None` without a (parsable) ledger timestamp.
    pub elapsed_secs: Option<u64>,
    pub max_crashes: Option<u32>,
    pub ignored_files: usize,
    pub counts: StatusCounts,
    pub failed: Vec<FailedItem>,
}

/// Read the batch state without modifying anything.
///
/// A corrupt ledger is an error here too: the operator should see it.
pub fn collect_status(config_path: &Path, now: DateTime<Utc>) -> Result<StatusReport> {
    let cfg = load_config(config_path)?;
    let paths = BatchPaths::resolve(config_path, &cfg);
    let sentinel_present = Sentinel::new(&paths.sentinel_path).is_present();

    let Some(state) = read_ledger(&paths.ledger_path)? else {
        return Ok(StatusReport {
            sentinel_present,
            ledger_present: false,
            started_at: None,
            elapsed_secs: None,
            max_crashes: None,
            ignored_files: 0,
            counts: StatusCounts::default(),
            failed: Vec::new(),
        });
    };

    let elapsed_secs = match DateTime::parse_from_rfc3339(&state.started_at) {
        Ok(started) => {
            let secs = now.signed_duration_since(started.with_timezone(&Utc)).num_seconds();
            Some(u64::try_from(secs).unwrap_or(0))
        }
        Err(err) => {
            warn!(started_at = %state.started_at, error = %err, "unparsable ledger timestamp");
            None
        }
    };
    let failed = state
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::FailedPermanent)
        .map(|item| FailedItem {
            id: item.id.clone(),
            crash_count: item.crash_count,
            diagnostic: item.last_error.clone(),
        })
        .collect();

    Ok(StatusReport {
        sentinel_present,
        ledger_present: true,
        elapsed_secs,
        max_crashes: Some(state.max_crashes),
        ignored_files: state.ignored_files,
        counts: state.counts(),
        failed,
        started_at: Some(state.started_at),
    })
}

/// `HH:MM:SS`; hours keep counting past 99.
pub fn format_hms(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn render_text(report: &StatusReport) -> String {
    let mut out = String::new();
    let sentinel = if report.sentinel_present {
        "present (batch running or interrupted)"
    } else {
        "absent"
    };
    let _ = writeln!(out, "sentinel: {sentinel}");
    if !report.ledger_present {
        let _ = writeln!(out, "ledger: not created yet");
        return out;
    }

    let counts = &report.counts;
    if let Some(started_at) = &report.started_at {
        let _ = writeln!(out, "started: {started_at}");
    }
    if let Some(secs) = report.elapsed_secs {
        let _ = writeln!(out, "elapsed: {}", format_hms(secs));
    }
    let _ = writeln!(
        out,
        "items: {} total, {} done, {} pending ({} in progress), {} failed",
        counts.total, counts.done, counts.pending, counts.in_progress, counts.failed_permanent
    );
    if let Some(max) = report.max_crashes {
        let _ = writeln!(out, "crashes: {} (max {max} per item)", counts.crashes);
    }
    if report.ignored_files > 0 {
        let _ = writeln!(out, "ignored files: {}", report.ignored_files);
    }
    if !report.failed.is_empty() {
        let _ = writeln!(out, "failed items:");
        for item in &report.failed {
            let diagnostic = item.diagnostic.as_deref().unwrap_or("no diagnostic");
            let _ = writeln!(out, "  {} ({} crashes): {diagnostic}", item.id, item.crash_count);
        }
    }
    out
}
