//! Source folder listing: the external collaborator that seeds a new ledger.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::error::BatchError;

/// Files discovered in the source folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceListing {
    /// Matching file names, sorted.
    pub items: Vec<String>,
    /// Regular files skipped because their extension did not match or their
    /// name is not valid UTF-8.
    pub ignored: usize,
}

/// List regular files in `dir` whose extension matches one of `extensions`
/// (case-insensitive). Subdirectories are not traversed.
pub fn list_source_items(dir: &Path, extensions: &[String]) -> Result<SourceListing> {
    if !dir.is_dir() {
        return Err(BatchError::LaunchFailure(format!(
            "source folder {} does not exist",
            dir.display()
        ))
        .into());
    }

    let mut items = Vec::new();
    let mut ignored = 0usize;
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read entry")?;
        let file_type = entry.file_type().context("read file type")?;
        if !file_type.is_file() {
            continue;
        }
        // Ledger ids must name the file exactly.
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(name = ?raw, "skipping source file with non-UTF-8 name");
                ignored += 1;
                continue;
            }
        };
        if has_extension(&name, extensions) {
            items.push(name);
        } else {
            ignored += 1;
        }
    }
    items.sort();
    debug!(dir = %dir.display(), items = items.len(), ignored, "source listed");
    Ok(SourceListing { items, ignored })
}

fn has_extension(name: &str, extensions: &[String]) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}
