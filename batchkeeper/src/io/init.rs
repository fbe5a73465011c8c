//! Canonical batch paths and `batchkeeper init` scaffolding.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use super::config::{BatchConfig, write_config};

/// All durable paths of a batch, resolved against the config directory.
#[derive(Debug, Clone)]
pub struct BatchPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub source_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub sentinel_path: PathBuf,
    pub qc_dir: PathBuf,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
    pub template_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub host_executable: Option<PathBuf>,
}

impl BatchPaths {
    pub fn resolve(config_path: &Path, cfg: &BatchConfig) -> Self {
        let root = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let join = |path: &Path| root.join(path);
        Self {
            config_path: config_path.to_path_buf(),
            source_dir: join(&cfg.batch.source_dir),
            ledger_path: join(&cfg.batch.ledger_path),
            sentinel_path: join(&cfg.batch.sentinel_path),
            qc_dir: join(&cfg.batch.qc_dir),
            log_dir: join(&cfg.batch.log_dir),
            output_dir: join(&cfg.processor.output_dir),
            template_path: cfg.host.template.as_deref().map(join),
            script_path: cfg.host.script.as_deref().map(join),
            host_executable: cfg.host.executable.as_deref().map(|exe| {
                // Bare program names are looked up on PATH at spawn time.
                if exe.components().count() > 1 {
                    join(exe)
                } else {
                    exe.to_path_buf()
                }
            }),
            root,
        }
    }
}

/// Options for `init_config`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config file.
    pub force: bool,
}

/// Write a default `batchkeeper.toml` at `config_path`.
///
/// Fails if the file already exists unless `options.force` is set.
pub fn init_config(config_path: &Path, options: &InitOptions) -> Result<BatchPaths> {
    if config_path.exists() && !options.force {
        return Err(anyhow!(
            "batchkeeper init: {} already exists (use --force to overwrite)",
            config_path.display()
        ));
    }
    let cfg = BatchConfig::default();
    write_config(config_path, &cfg)?;
    Ok(BatchPaths::resolve(config_path, &cfg))
}
