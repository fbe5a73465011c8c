//! Item processor seam.
//!
//! The [`ItemProcessor`] trait is the single point where business logic
//! (loading, transforming, rendering one source file) plugs into the batch
//! runner. The runner only sees success or failure plus a diagnostic; a host
//! crash inside `process` simply never returns.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Item, ItemOutcome};
use crate::error::BatchError;
use crate::io::config::BatchConfig;
use crate::io::init::BatchPaths;
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::template::{ArgRenderer, TemplateVars};

/// Abstraction over per-item processing backends.
pub trait ItemProcessor {
    /// Process one item. An `Err` is recorded as a failed attempt, never
    /// escalated past the item.
    fn process(&self, item: &Item) -> Result<ItemOutcome>;
}

/// Processor that runs a configured command per item.
pub struct CommandProcessor {
    command: Vec<String>,
    outputs: Vec<String>,
    base_vars: TemplateVars,
    source_dir: PathBuf,
    output_dir: PathBuf,
    log_dir: PathBuf,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    renderer: ArgRenderer,
}

impl CommandProcessor {
    pub fn from_config(cfg: &BatchConfig, paths: &BatchPaths) -> Result<Self> {
        if cfg.processor.command.is_empty() {
            return Err(BatchError::InvalidConfig(
                "processor.command must be a non-empty array".to_string(),
            )
            .into());
        }
        let mut base_vars = TemplateVars::new();
        base_vars.insert("source_dir", display(&paths.source_dir));
        base_vars.insert("output_dir", display(&paths.output_dir));
        base_vars.insert("template", optional_display(paths.template_path.as_deref()));
        base_vars.insert("script", optional_display(paths.script_path.as_deref()));
        base_vars.insert("max_crashes", cfg.batch.max_crashes.to_string());

        let processor = Self {
            command: cfg.processor.command.clone(),
            outputs: cfg.processor.outputs.clone(),
            base_vars,
            source_dir: paths.source_dir.clone(),
            output_dir: paths.output_dir.clone(),
            log_dir: paths.log_dir.clone(),
            workdir: paths.root.clone(),
            timeout: Duration::from_secs(cfg.processor.timeout_secs),
            output_limit_bytes: cfg.processor.output_limit_bytes,
            renderer: ArgRenderer::new(),
        };
        processor.check_templates()?;
        Ok(processor)
    }

    /// Render every template once so a typo fails before any item is touched.
    fn check_templates(&self) -> Result<()> {
        let probe = Item::pending("probe.blend");
        let vars = self.item_vars(&probe);
        self.renderer
            .render_all(&self.command, &vars)
            .and_then(|_| self.renderer.render_all(&self.outputs, &vars))
            .map_err(|err| BatchError::InvalidConfig(format!("{err:#}")))?;
        Ok(())
    }

    fn item_vars(&self, item: &Item) -> TemplateVars {
        let mut vars = self.base_vars.clone();
        vars.insert("item", item.id.clone());
        vars.insert("stem", item.stem().to_string());
        vars.insert("source_path", display(&self.source_dir.join(&item.id)));
        vars
    }

    /// Output files that must exist once `item` has been processed.
    pub fn expected_outputs(&self, item: &Item) -> Result<Vec<PathBuf>> {
        let vars = self.item_vars(item);
        self.outputs
            .iter()
            .map(|template| {
                let rendered = self.renderer.render(template, &vars)?;
                Ok(self.output_dir.join(rendered))
            })
            .collect()
    }

    /// True when output templates are configured and every output exists.
    pub fn outputs_exist(&self, item: &Item) -> Result<bool> {
        if self.outputs.is_empty() {
            return Ok(false);
        }
        Ok(self
            .expected_outputs(item)?
            .iter()
            .all(|path| path.is_file()))
    }

    fn log_path(&self, item: &Item) -> PathBuf {
        self.log_dir.join(format!("{}.log", item.id))
    }
}

impl ItemProcessor for CommandProcessor {
    #[instrument(skip_all, fields(item = %item.id))]
    fn process(&self, item: &Item) -> Result<ItemOutcome> {
        let argv = self.renderer.render_all(&self.command, &self.item_vars(item))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("processor command rendered to nothing"))?;
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("create output dir {}", self.output_dir.display()))?;

        info!(program = %program, "processing item");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run processor for {}", item.id))?;
        write_item_log(&self.log_path(item), &output, self.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "processor timed out");
            return Ok(ItemOutcome::Failure(format!(
                "processor timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            let status = match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            };
            let detail = output.last_line().unwrap_or_else(|| "no output".to_string());
            warn!(%status, "processor failed");
            return Ok(ItemOutcome::Failure(format!("processor {status}: {detail}")));
        }

        let missing: Vec<String> = self
            .expected_outputs(item)?
            .into_iter()
            .filter(|path| !path.is_file())
            .map(|path| path.display().to_string())
            .collect();
        if !missing.is_empty() {
            warn!(missing = missing.len(), "expected outputs missing");
            return Ok(ItemOutcome::Failure(format!(
                "render not found after complete: {}",
                missing.join(", ")
            )));
        }

        debug!("item processed");
        Ok(ItemOutcome::Success)
    }
}

fn write_item_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create item log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.truncated_notice("processor"));
    if output.timed_out {
        buf.push_str("\n[processor timed out]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated = format!("{}\n[truncated {} bytes]\n", &buf[..cut], buf.len() - cut);
        fs::write(path, truncated).with_context(|| format!("write item log {}", path.display()))?;
        return Ok(());
    }

    fs::write(path, buf).with_context(|| format!("write item log {}", path.display()))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn optional_display(path: Option<&Path>) -> String {
    path.map(display).unwrap_or_default()
}
