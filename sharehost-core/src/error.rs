//! Error types for sharehost-core.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Protocol catalog lookup failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No descriptor is registered under this name.
    #[error("unknown protocol '{name}'; known protocols: {known}")]
    UnknownProtocol { name: String, known: String },
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::UnknownProtocol { .. } => "UnknownProtocol",
        }
    }
}

/// All errors that can arise from the persisted record store and settings.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error (audit log append path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error on load, with file path and line context from serde_yaml.
    #[error("failed to parse record at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The requested record file does not exist.
    #[error("{what} not found at {path}")]
    NotFound { what: &'static str, path: PathBuf },
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NotFound",
            _ => "Store",
        }
    }
}

/// Wrap an `io::Error` with the path that produced it.
pub fn io_err(path: impl AsRef<Path>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.as_ref().to_path_buf(),
        source,
    }
}
