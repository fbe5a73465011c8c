//! Per-item QC notes (`qc_errors/<id>.txt`).
//!
//! A note marks an item as excluded when a new ledger is seeded, and the
//! batch runner writes one when an item fails permanently. Existing notes
//! are never overwritten: a human-written note wins.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct QcNotes {
    dir: PathBuf,
}

impl QcNotes {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn note_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.txt"))
    }

    /// Read the note for `id`, if a non-blank one exists.
    pub fn read(&self, id: &str) -> Result<Option<String>> {
        let path = self.note_path(id);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let trimmed = contents.trim();
                Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read qc note {}", path.display())),
        }
    }

    /// Write `note` for `id` unless a note already exists. Returns `true` if written.
    pub fn write_if_absent(&self, id: &str, note: &str) -> Result<bool> {
        let path = self.note_path(id);
        if path.exists() {
            return Ok(false);
        }
        create_dir(&self.dir)?;
        fs::write(&path, note).with_context(|| format!("write qc note {}", path.display()))?;
        Ok(true)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
