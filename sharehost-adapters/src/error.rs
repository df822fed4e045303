//! Error types for sharehost-adapters.

use std::path::PathBuf;

use thiserror::Error;

use sharehost_renderer::RenderError;

/// All errors raised while driving an external daemon.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The package manager exited non-zero; `output` is its captured output.
    #[error("{program} failed: {output}")]
    PackageManager { program: String, output: String },

    #[error("{0}")]
    UnsupportedDistribution(String),

    /// The service exited (or never came up) after a start request.
    #[error("{unit} failed to start: {detail}")]
    StartFailed { unit: String, detail: String },

    /// The service was still activating when the deadline passed.
    #[error("{unit} did not become active within {timeout_ms} ms")]
    StartTimeout { unit: String, timeout_ms: u64 },

    /// A service-manager action other than start failed.
    #[error("{action} {unit} failed: {detail}")]
    ServiceCommand {
        action: &'static str,
        unit: String,
        detail: String,
    },

    /// Staged native config was rejected; the live config is untouched.
    #[error("configuration rejected for {path}: {detail}")]
    ConfigValidationFailed { path: PathBuf, detail: String },

    /// Validated config could not be installed or applied.
    #[error("applying configuration failed: {detail}")]
    ConfigApplyFailed { detail: String },

    #[error("{protocol}: {operation} is not implemented")]
    NotImplemented {
        protocol: &'static str,
        operation: &'static str,
    },

    /// A helper program could not be executed at all.
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdapterError {
    /// Stable taxonomy name surfaced to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::PackageManager { .. } => "PackageManagerError",
            AdapterError::UnsupportedDistribution(_) => "UnsupportedDistribution",
            AdapterError::StartFailed { .. } => "StartFailed",
            AdapterError::StartTimeout { .. } => "StartTimeout",
            AdapterError::ServiceCommand { .. } => "ServiceCommandFailed",
            AdapterError::ConfigValidationFailed { .. } => "ConfigValidationFailed",
            AdapterError::ConfigApplyFailed { .. } => "ConfigApplyFailed",
            AdapterError::NotImplemented { .. } => "NotImplemented",
            AdapterError::Spawn { .. } | AdapterError::Io { .. } => "Io",
            AdapterError::Render(_) | AdapterError::Json(_) => "ConfigApplyFailed",
        }
    }
}

/// Convenience constructor for [`AdapterError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AdapterError {
    AdapterError::Io {
        path: path.into(),
        source,
    }
}
