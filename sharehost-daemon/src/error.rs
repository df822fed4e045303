use std::path::PathBuf;

use thiserror::Error;

use sharehost_adapters::AdapterError;
use sharehost_core::{ProtocolName, ProtocolStatus, RegistryError, StoreError};
use sharehost_sync::SyncError;

/// Error surface for the orchestrator, the socket protocol and the runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Another operation holds this protocol's lock.
    #[error("{protocol}: {operation} already in progress")]
    OperationInProgress {
        protocol: ProtocolName,
        operation: String,
    },

    #[error("{protocol}: cannot {operation} while {status}")]
    InvalidTransition {
        protocol: ProtocolName,
        operation: &'static str,
        status: ProtocolStatus,
    },

    #[error("{protocol} is still exposed by shared path(s): {paths}")]
    ProtocolInUse { protocol: ProtocolName, paths: String },

    #[error("{operation} requires an administrator")]
    Forbidden { operation: &'static str },

    #[error("invalid shared path: {0}")]
    InvalidPath(String),

    #[error("invalid user name '{0}'")]
    InvalidUsername(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("service unit error: {0}")]
    ServiceUnit(String),
}

impl DaemonError {
    /// Stable taxonomy name surfaced to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            DaemonError::Registry(e) => e.kind(),
            DaemonError::OperationInProgress { .. } => "OperationInProgress",
            DaemonError::InvalidTransition { .. } => "InvalidTransition",
            DaemonError::ProtocolInUse { .. } => "ProtocolInUse",
            DaemonError::Forbidden { .. } => "Forbidden",
            DaemonError::InvalidPath(_) => "InvalidPath",
            DaemonError::InvalidUsername(_) => "InvalidUsername",
            DaemonError::InvalidSettings(_) => "ConfigValidationFailed",
            DaemonError::NotFound { .. } => "NotFound",
            DaemonError::Conflict(_) => "Conflict",
            DaemonError::Adapter(e) => e.kind(),
            DaemonError::Sync(e) => e.kind(),
            DaemonError::Store(e) => e.kind(),
            DaemonError::Io { .. } => "Io",
            DaemonError::Notify(_) => "Io",
            DaemonError::Json(_) => "Protocol",
            DaemonError::ChannelClosed(_) | DaemonError::Protocol(_) => "Protocol",
            DaemonError::DaemonNotRunning { .. } => "DaemonNotRunning",
            DaemonError::ServiceUnit(_) => "ServiceUnit",
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
