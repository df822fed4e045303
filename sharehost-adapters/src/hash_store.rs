//! Digest store for hash-gated native config writes.
//!
//! One JSON document per protocol at `<state_dir>/hashes/<protocol>.json`,
//! mapping each live config path to the SHA-256 of the content last applied.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, AdapterError};

/// Live config path (as string) to hex digest.
pub type HashStore = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashStoreFile {
    pub applied_at: DateTime<Utc>,
    pub files: HashStore,
}

impl Default for HashStoreFile {
    fn default() -> Self {
        Self {
            applied_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }
}

pub fn store_path_at(state_dir: &Path, protocol: &str) -> PathBuf {
    state_dir.join("hashes").join(format!("{protocol}.json"))
}

/// SHA-256 of `content` with line endings normalised to LF.
pub fn digest(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.replace("\r\n", "\n").as_bytes());
    hex::encode(h.finalize())
}

/// Returns an empty store when none was saved yet.
pub fn load_at(state_dir: &Path, protocol: &str) -> Result<HashStoreFile, AdapterError> {
    let path = store_path_at(state_dir, protocol);
    if !path.exists() {
        return Ok(HashStoreFile::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn save_at(
    state_dir: &Path,
    protocol: &str,
    store: &HashStoreFile,
) -> Result<(), AdapterError> {
    let path = store_path_at(state_dir, protocol);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid hash store path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Forget every digest, forcing the next configure to rewrite.
pub fn clear_at(state_dir: &Path, protocol: &str) -> Result<(), AdapterError> {
    let path = store_path_at(state_dir, protocol);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}
