//! Ledger load/save with schema + invariant validation.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::core::types::LedgerState;
use crate::error::BatchError;

const LEDGER_SCHEMA: &str = include_str!("../../schemas/ledger.v1.schema.json");

/// Read and validate the ledger at `path`.
///
/// Returns `Ok(None)` when no ledger exists yet. A file that exists but fails to
/// parse, violates the schema, or breaks ledger invariants is reported as
/// [`BatchError::CorruptLedger`]; it is never discarded or rebuilt.
pub fn read_ledger(path: &Path) -> Result<Option<LedgerState>> {
    if !path.exists() {
        debug!(path = %path.display(), "no ledger on disk");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .map_err(|err| BatchError::corrupt(path, format!("parse failed: {err}")))?;
    validate_schema(path, &value)?;
    let state: LedgerState = serde_json::from_value(value)
        .map_err(|err| BatchError::corrupt(path, format!("deserialize failed: {err}")))?;
    let errors = validate_invariants(&state);
    if !errors.is_empty() {
        return Err(BatchError::corrupt(path, errors.join("; ")).into());
    }
    debug!(path = %path.display(), total = state.total, "ledger loaded");
    Ok(Some(state))
}

/// Atomically write the ledger (temp file + fsync + rename).
///
/// A reader after a crash at any point sees either the previous ledger or the
/// new one, never a partial file. A state that [`read_ledger`] would reject
/// is refused before anything touches disk.
pub fn write_ledger(path: &Path, state: &LedgerState) -> Result<()> {
    let errors = validate_invariants(state);
    if !errors.is_empty() {
        return Err(anyhow!(
            "refusing to write invalid ledger {}: {}",
            path.display(),
            errors.join("; ")
        ));
    }
    let mut buf = serde_json::to_string_pretty(state).context("serialize ledger")?;
    buf.push('\n');

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create temp ledger {}", tmp_path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("write temp ledger {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync temp ledger {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("replace ledger {}", path.display()))?;
    Ok(())
}

fn validate_schema(path: &Path, ledger: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(LEDGER_SCHEMA).context("parse ledger schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid ledger schema: {err}"))?;
    if !compiled.is_valid(ledger) {
        let messages = compiled
            .iter_errors(ledger)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(BatchError::corrupt(
            path,
            format!("schema validation failed: {}", messages.join("; ")),
        )
        .into());
    }
    Ok(())
}
