//! Crash sentinel: a zero-content marker file.
//!
//! Presence after a host exit means "the batch is not finished, relaunch".
//! The payload is existence alone, so a crash can never corrupt it into a
//! false negative.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    path: PathBuf,
}

impl Sentinel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_present(&self) -> bool {
        self.path.exists()
    }

    /// Create the marker unless it already exists.
    ///
    /// Returns `true` if this call created it.
    pub fn create_if_absent(&self) -> Result<bool> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => {
                file.sync_all()
                    .with_context(|| format!("sync sentinel {}", self.path.display()))?;
                info!(path = %self.path.display(), "sentinel created");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "sentinel already present");
                Ok(false)
            }
            Err(err) => {
                Err(err).with_context(|| format!("create sentinel {}", self.path.display()))
            }
        }
    }

    /// Remove the marker. Returns `true` if it was present.
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "sentinel removed");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("remove sentinel {}", self.path.display()))
            }
        }
    }
}
