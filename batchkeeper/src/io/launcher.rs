//! Host launcher seam used by the watchdog.
//!
//! [`Launcher`] decouples the supervisor loop from process spawning. Tests
//! use scripted launchers that run the batch runner in-process.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::error::BatchError;
use crate::io::config::BatchConfig;
use crate::io::init::BatchPaths;
use crate::io::template::{ArgRenderer, TemplateVars};

/// Fully rendered host invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Kill the host after this long; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// How a host run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostExit {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub timed_out: bool,
}

impl HostExit {
    pub fn clean() -> Self {
        Self {
            code: Some(0),
            timed_out: false,
        }
    }

    pub fn crashed() -> Self {
        Self {
            code: None,
            timed_out: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.code == Some(0) && !self.timed_out
    }
}

/// Abstraction over host launching backends.
pub trait Launcher {
    /// Start the host and block until it terminates, whatever the exit code.
    fn launch(&self, request: &LaunchRequest) -> Result<HostExit>;
}

/// Launcher that spawns the host as a child process, inheriting stdout/stderr.
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<HostExit> {
        info!(program = %request.program.display(), "launching host");
        let mut child = Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    anyhow::Error::new(BatchError::LaunchFailure(format!(
                        "cannot start host {}: {err}",
                        request.program.display()
                    )))
                }
                _ => anyhow::Error::new(err).context("spawn host"),
            })?;

        let Some(timeout) = request.timeout else {
            let status = child.wait().context("wait for host")?;
            debug!(exit_code = ?status.code(), "host exited");
            return Ok(HostExit {
                code: status.code(),
                timed_out: false,
            });
        };

        match child.wait_timeout(timeout).context("wait for host")? {
            Some(status) => {
                debug!(exit_code = ?status.code(), "host exited");
                Ok(HostExit {
                    code: status.code(),
                    timed_out: false,
                })
            }
            None => {
                warn!(timeout_secs = timeout.as_secs(), "host timed out, killing");
                child.kill().context("kill host")?;
                let status = child.wait().context("wait host after kill")?;
                Ok(HostExit {
                    code: status.code(),
                    timed_out: true,
                })
            }
        }
    }
}

/// Build the host invocation and check launch prerequisites.
///
/// With no `host.executable` configured, `self_exe` (this binary) is launched
/// as `batchkeeper --config <path> host`. Missing configured paths or a
/// missing source folder are reported as [`BatchError::LaunchFailure`].
pub fn host_launch_request(
    cfg: &BatchConfig,
    paths: &BatchPaths,
    self_exe: &Path,
) -> Result<LaunchRequest> {
    require_dir(&paths.source_dir, "source folder")?;
    if let Some(template) = &paths.template_path {
        require_file(template, "processing template")?;
    }
    if let Some(script) = &paths.script_path {
        require_file(script, "in-host script")?;
    }

    let timeout = (cfg.host.timeout_secs > 0).then(|| Duration::from_secs(cfg.host.timeout_secs));
    let Some(executable) = &paths.host_executable else {
        return Ok(LaunchRequest {
            program: self_exe.to_path_buf(),
            args: vec![
                "--config".to_string(),
                paths.config_path.display().to_string(),
                "host".to_string(),
            ],
            workdir: paths.root.clone(),
            timeout,
        });
    };

    if executable.components().count() > 1 {
        require_file(executable, "host executable")?;
    }

    let mut vars = TemplateVars::new();
    vars.insert("executable", executable.display().to_string());
    vars.insert("config", paths.config_path.display().to_string());
    vars.insert("source_dir", paths.source_dir.display().to_string());
    vars.insert("max_crashes", cfg.batch.max_crashes.to_string());
    vars.insert(
        "template",
        paths
            .template_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    );
    vars.insert(
        "script",
        paths
            .script_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    );
    let args = ArgRenderer::new()
        .render_all(&cfg.host.args, &vars)
        .context("render host.args")?;

    Ok(LaunchRequest {
        program: executable.clone(),
        args,
        workdir: paths.root.clone(),
        timeout,
    })
}

fn require_dir(path: &Path, what: &str) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    Err(BatchError::LaunchFailure(format!("{what} {} does not exist", path.display())).into())
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    Err(BatchError::LaunchFailure(format!("{what} {} does not exist", path.display())).into())
}
