//! Native-config drift detection.
//!
//! Signal precedence:
//! 1. `NeverApplied` (hash store missing or empty)
//! 2. `Missing` (an applied live file no longer exists)
//! 3. `Modified` (a live file was edited outside sharehost)
//! 4. `Current`

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sharehost_adapters::hash_store;

use crate::error::io_err;
use crate::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum DriftSignal {
    NeverApplied,
    Current { applied_at: DateTime<Utc> },
    Missing { files: Vec<PathBuf> },
    Modified { files: Vec<PathBuf> },
}

impl DriftSignal {
    pub fn is_current(&self) -> bool {
        matches!(self, DriftSignal::Current { .. })
    }
}

/// Compare the live files of `protocol` against the digests recorded when
/// they were last applied.
pub fn check(state_dir: &Path, protocol: &str) -> Result<DriftSignal, SyncError> {
    let store_path = hash_store::store_path_at(state_dir, protocol);
    if !store_path.exists() {
        return Ok(DriftSignal::NeverApplied);
    }
    let store = hash_store::load_at(state_dir, protocol).map_err(SyncError::HashStore)?;
    if store.files.is_empty() {
        return Ok(DriftSignal::NeverApplied);
    }

    let mut missing = Vec::new();
    let mut modified = Vec::new();
    for (key, expected) in &store.files {
        let path = PathBuf::from(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                if &hash_store::digest(&content) != expected {
                    modified.push(path);
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => missing.push(path),
            Err(err) => return Err(io_err(&path, err)),
        }
    }

    if !missing.is_empty() {
        return Ok(DriftSignal::Missing { files: missing });
    }
    if !modified.is_empty() {
        return Ok(DriftSignal::Modified { files: modified });
    }
    Ok(DriftSignal::Current {
        applied_at: store.applied_at,
    })
}

/// Compact age of an `applied_at` stamp, e.g. `3h`.
pub fn applied_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
