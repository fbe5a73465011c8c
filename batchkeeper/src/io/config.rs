//! Batch configuration stored in `batchkeeper.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::DEFAULT_MAX_CRASHES;
use crate::error::BatchError;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "batchkeeper.toml";

/// Batch configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take defaults; relative paths
/// resolve against the directory containing the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    pub batch: BatchSection,
    pub host: HostConfig,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchSection {
    /// Folder holding the submitted source files.
    pub source_dir: PathBuf,
    /// File extensions (without dot, case-insensitive) that become items.
    pub extensions: Vec<String>,
    /// Crash attributions after which an item fails permanently.
    pub max_crashes: u32,
    pub ledger_path: PathBuf,
    /// Marker whose presence after a host exit means "relaunch".
    pub sentinel_path: PathBuf,
    /// Per-item QC notes (`<id>.txt`).
    pub qc_dir: PathBuf,
    /// Per-item processor command logs (`<id>.log`).
    pub log_dir: PathBuf,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("source"),
            extensions: vec!["blend".to_string()],
            max_crashes: DEFAULT_MAX_CRASHES,
            ledger_path: PathBuf::from("ledger.json"),
            sentinel_path: PathBuf::from("restart_until_finished.txt"),
            qc_dir: PathBuf::from("qc_errors"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// How the watchdog launches the host process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// Host executable. Unset means `batchkeeper host` (this binary) is the host.
    pub executable: Option<PathBuf>,
    /// Argument templates for `executable`. Variables: `executable`, `template`,
    /// `script`, `source_dir`, `max_crashes`, `config`.
    pub args: Vec<String>,
    /// Processing template handed to the host (e.g. the render scene).
    pub template: Option<PathBuf>,
    /// In-host processing script.
    pub script: Option<PathBuf>,
    /// Kill the host after this many seconds (0 = never).
    pub timeout_secs: u64,
    /// Pause before relaunching a crashed host.
    pub relaunch_delay_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            template: None,
            script: None,
            timeout_secs: 0,
            relaunch_delay_ms: 1_000,
        }
    }
}

/// Per-item command run by the in-host batch runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Argument templates; the first renders to the program. Variables: `item`,
    /// `stem`, `source_dir`, `source_path`, `template`, `script`, `output_dir`,
    /// `max_crashes`.
    pub command: Vec<String>,
    /// Output file templates (relative to `output_dir`) that must exist after a
    /// successful command, e.g. `render_full/{{ stem }}.png`.
    pub outputs: Vec<String>,
    pub output_dir: PathBuf,
    /// Wall-clock budget for one item.
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            outputs: Vec::new(),
            output_dir: PathBuf::from("renders"),
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch.max_crashes == 0 {
            return invalid("batch.max_crashes must be > 0");
        }
        if self.batch.extensions.iter().any(|ext| ext.trim().is_empty()) {
            return invalid("batch.extensions must not contain empty entries");
        }
        if self.batch.ledger_path == self.batch.sentinel_path {
            return invalid("batch.ledger_path and batch.sentinel_path must differ");
        }
        if self.host.executable.is_none() && !self.host.args.is_empty() {
            return invalid("host.args requires host.executable");
        }
        if self.processor.timeout_secs == 0 {
            return invalid("processor.timeout_secs must be > 0");
        }
        if self.processor.output_limit_bytes == 0 {
            return invalid("processor.output_limit_bytes must be > 0");
        }
        if self
            .processor
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return invalid("processor.command program must be non-empty");
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<()> {
    Err(BatchError::InvalidConfig(msg.to_string()).into())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BatchConfig::default()`.
pub fn load_config(path: &Path) -> Result<BatchConfig> {
    if !path.exists() {
        let cfg = BatchConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BatchConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BatchConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
