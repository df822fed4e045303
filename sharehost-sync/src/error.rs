//! Error types for sharehost-sync.

use std::path::PathBuf;

use thiserror::Error;

use sharehost_adapters::AdapterError;
use sharehost_core::error::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Reading the persisted model failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Rendering, validating or installing the native config failed. The
    /// previous live config is still in place.
    #[error("configure failed: {0}")]
    Configure(#[source] AdapterError),

    /// The new config is live but the daemon refused it. `rollback_candidates`
    /// are the backups of the config that was live before.
    #[error("reload failed: {source}")]
    Reload {
        #[source]
        source: AdapterError,
        rollback_candidates: Vec<PathBuf>,
    },

    /// The record of what was last applied could not be read.
    #[error("hash store: {0}")]
    HashStore(#[source] AdapterError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Store(e) => e.kind(),
            SyncError::Configure(e)
            | SyncError::HashStore(e)
            | SyncError::Reload { source: e, .. } => e.kind(),
            SyncError::Io { .. } => "Io",
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
