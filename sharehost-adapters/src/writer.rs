//! Staged, validated, hash-gated replacement of live native config.
//!
//! ## `apply_at` protocol
//!
//! 1. Hash every rendered file; skip those whose digest matches the store
//!    and whose live file still exists.
//! 2. Write the rest to `<path>.sharehost.tmp`.
//! 3. Run the caller's check on each staged file. Any failure removes all
//!    staged files and leaves every live file untouched.
//! 4. Copy each live file to `<path>.sharehost.bak`, then rename the staged
//!    file over it (atomic on POSIX). A failed rename restores the files
//!    already replaced from their backups.
//! 5. Record the new digests.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use sharehost_renderer::RenderedFile;

use crate::error::{io_err, AdapterError};
use crate::hash_store;

pub const STAGE_SUFFIX: &str = "sharehost.tmp";
pub const BACKUP_SUFFIX: &str = "sharehost.bak";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Live file replaced; `backup` holds the previous content if there was any.
    Written {
        path: PathBuf,
        backup: Option<PathBuf>,
    },
    /// Rendered content matches what was last applied.
    Unchanged { path: PathBuf },
    /// Dry run: the file would have been replaced.
    WouldWrite { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path, .. }
            | WriteResult::Unchanged { path }
            | WriteResult::WouldWrite { path } => path,
        }
    }
}

/// Outcome of one `configure` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub writes: Vec<WriteResult>,
    /// Stale files removed from a managed directory.
    pub pruned: Vec<PathBuf>,
    /// Non-fatal problems met while applying (e.g. a policy attach that failed).
    pub warnings: Vec<String>,
}

impl ApplyReport {
    /// `true` when any live file was replaced or removed.
    pub fn changed(&self) -> bool {
        !self.pruned.is_empty()
            || self
                .writes
                .iter()
                .any(|w| matches!(w, WriteResult::Written { .. }))
    }

    /// `true` when a dry run found files that would be replaced.
    pub fn would_change(&self) -> bool {
        self.writes
            .iter()
            .any(|w| matches!(w, WriteResult::WouldWrite { .. }))
    }

    /// Backups taken during this pass, usable as rollback candidates.
    pub fn backups(&self) -> Vec<PathBuf> {
        self.writes
            .iter()
            .filter_map(|w| match w {
                WriteResult::Written {
                    backup: Some(b), ..
                } => Some(b.clone()),
                _ => None,
            })
            .collect()
    }
}

pub fn staged_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.{STAGE_SUFFIX}", path.display()))
}

pub fn backup_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.{BACKUP_SUFFIX}", path.display()))
}

// ---------------------------------------------------------------------------
// apply_at
// ---------------------------------------------------------------------------

/// Apply `files` for `protocol`, running `check` on each staged copy before
/// anything live is touched.
pub fn apply_at<F>(
    state_dir: &Path,
    protocol: &str,
    files: &[RenderedFile],
    dry_run: bool,
    check: F,
) -> Result<ApplyReport, AdapterError>
where
    F: Fn(&Path, &RenderedFile) -> Result<(), AdapterError>,
{
    let mut store = hash_store::load_at(state_dir, protocol)?;
    let mut report = ApplyReport::default();
    let mut pending: Vec<(&RenderedFile, String)> = Vec::new();

    for file in files {
        let digest = hash_store::digest(&file.content);
        let key = file.path.to_string_lossy().to_string();
        if store.files.get(&key) == Some(&digest) && file.path.exists() {
            tracing::debug!(path = %file.path.display(), "unchanged");
            report.writes.push(WriteResult::Unchanged {
                path: file.path.clone(),
            });
            continue;
        }
        if dry_run {
            report.writes.push(WriteResult::WouldWrite {
                path: file.path.clone(),
            });
            continue;
        }
        pending.push((file, digest));
    }

    if pending.is_empty() {
        return Ok(report);
    }

    // Stage and check everything before touching live files.
    let mut staged: Vec<PathBuf> = Vec::new();
    for (file, _) in &pending {
        let tmp = staged_path(&file.path);
        let result = stage(&file.path, &tmp, &file.content).and_then(|()| {
            staged.push(tmp.clone());
            check(tmp.as_path(), *file)
        });
        if let Err(e) = result {
            discard(&staged);
            tracing::warn!(protocol, path = %file.path.display(), error = %e, "staged config rejected");
            return Err(e);
        }
    }

    let mut committed: Vec<(PathBuf, Option<PathBuf>)> = Vec::new();
    for (file, digest) in &pending {
        let tmp = staged_path(&file.path);
        match commit(&file.path, &tmp) {
            Ok(backup) => {
                committed.push((file.path.clone(), backup.clone()));
                store
                    .files
                    .insert(file.path.to_string_lossy().to_string(), digest.clone());
                tracing::info!(protocol, path = %file.path.display(), "wrote");
                report.writes.push(WriteResult::Written {
                    path: file.path.clone(),
                    backup,
                });
            }
            Err(e) => {
                discard(&staged);
                restore(&committed);
                return Err(AdapterError::ConfigApplyFailed {
                    detail: format!("replacing {}: {e}", file.path.display()),
                });
            }
        }
    }

    store.applied_at = Utc::now();
    hash_store::save_at(state_dir, protocol, &store)?;
    Ok(report)
}

/// Remove files previously applied under `dir` that are not in `keep`.
pub fn prune_at(
    state_dir: &Path,
    protocol: &str,
    dir: &Path,
    keep: &[PathBuf],
) -> Result<Vec<PathBuf>, AdapterError> {
    let mut store = hash_store::load_at(state_dir, protocol)?;
    let stale: Vec<String> = store
        .files
        .keys()
        .filter(|k| {
            let p = Path::new(k.as_str());
            p.starts_with(dir) && !keep.iter().any(|kept| kept == p)
        })
        .cloned()
        .collect();
    if stale.is_empty() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    for key in stale {
        let path = PathBuf::from(&key);
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(path, e)),
        }
        store.files.remove(&key);
    }
    hash_store::save_at(state_dir, protocol, &store)?;
    Ok(removed)
}

/// Put a backup taken by [`apply_at`] back in place of the live file.
pub fn restore_backup(path: &Path) -> Result<(), AdapterError> {
    let backup = backup_path(path);
    fs::copy(&backup, path).map_err(|e| io_err(&backup, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn stage(live: &Path, tmp: &Path, content: &str) -> Result<(), AdapterError> {
    if let Some(parent) = tmp.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(tmp, content.replace("\r\n", "\n")).map_err(|e| io_err(tmp, e))?;
    // Keep the live file's mode across the replace.
    if let Ok(meta) = fs::metadata(live) {
        fs::set_permissions(tmp, meta.permissions()).map_err(|e| io_err(tmp, e))?;
    }
    Ok(())
}

fn commit(live: &Path, tmp: &Path) -> std::io::Result<Option<PathBuf>> {
    let backup = if live.exists() {
        let bak = backup_path(live);
        fs::copy(live, &bak)?;
        Some(bak)
    } else {
        None
    };
    fs::rename(tmp, live)?;
    Ok(backup)
}

fn discard(staged: &[PathBuf]) {
    for tmp in staged {
        let _ = fs::remove_file(tmp);
    }
}

fn restore(committed: &[(PathBuf, Option<PathBuf>)]) {
    for (live, backup) in committed.iter().rev() {
        let result = match backup {
            Some(bak) => fs::copy(bak, live).map(|_| ()),
            None => fs::remove_file(live),
        };
        if let Err(e) = result {
            tracing::warn!(path = %live.display(), error = %e, "could not restore after failed apply");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
