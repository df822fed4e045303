//! Dry-run unified diff support for `sharehost diff`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use sharehost_adapters::ProtocolAdapter;
use sharehost_core::types::{ProtocolName, ProtocolRecord};

use crate::acl::{translate, AccessModel};
use crate::error::io_err;
use crate::SyncError;

/// A single rendered file diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Diff result for a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDiff {
    pub protocol: ProtocolName,
    pub diffs: Vec<FileDiff>,
    pub warnings: Vec<String>,
}

/// Render what synchronization would write and compare it to the live
/// files. No files are written.
pub fn diff_protocol(
    adapter: &dyn ProtocolAdapter,
    record: &ProtocolRecord,
    model: &AccessModel,
    storage_root: &Path,
) -> Result<ProtocolDiff, SyncError> {
    let descriptor = adapter.descriptor();
    let translation = translate(descriptor, record, storage_root, model);
    let rendered = adapter
        .render(&translation.desired)
        .map_err(SyncError::Configure)?;

    let rendered_paths: Vec<PathBuf> = rendered.iter().map(|f| f.path.clone()).collect();
    let mut diffs = Vec::new();
    for file in rendered {
        let wanted = normalize_line_endings(&file.content);
        let existing = read_existing_or_empty(&file.path)?;
        if existing == wanted {
            continue;
        }
        diffs.push(FileDiff {
            unified_diff: unified(&file.path, &existing, &wanted),
            path: file.path,
        });
    }

    // Live files that would be pruned (per-user files of revoked users).
    for live in adapter.live_config_paths() {
        if rendered_paths.contains(&live) || !live.exists() {
            continue;
        }
        let existing = read_existing_or_empty(&live)?;
        diffs.push(FileDiff {
            unified_diff: unified(&live, &existing, ""),
            path: live,
        });
    }

    Ok(ProtocolDiff {
        protocol: descriptor.protocol_name(),
        diffs,
        warnings: translation.warnings,
    })
}

fn unified(path: &Path, old: &str, new: &str) -> String {
    let old_header = format!("a{}", path.display());
    let new_header = format!("b{}", path.display());
    TextDiff::from_lines(old, new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

fn read_existing_or_empty(path: &Path) -> Result<String, SyncError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(normalize_line_endings(&content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}
