//! Request identity and the result shapes returned at the API edge.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use sharehost_core::registry::{AclModel, ProtocolDescriptor};
use sharehost_core::{
    PermissionLevel, ProtocolName, ProtocolRecord, ProtocolRuntimeState, ProtocolStatus,
    SharedPath, UserAccount, UserId, UserProtocolAccess,
};
use sharehost_sync::DriftSignal;

use crate::error::DaemonError;

/// Verified identity supplied by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Caller {
    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    /// Whoever can open the root-only socket.
    pub fn local() -> Self {
        Self::admin("root")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Accepted,
    NoOp,
    Failed,
    /// Another operation holds the protocol; poll and retry.
    InProgress,
}

/// Terminal result of one protocol operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    pub protocol: ProtocolName,
    pub operation: String,
    pub outcome: Outcome,
    /// `None` only when the protocol itself is unknown.
    pub status: Option<ProtocolStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl OperationReport {
    pub fn new(protocol: ProtocolName, operation: &str, outcome: Outcome, status: ProtocolStatus) -> Self {
        Self {
            protocol,
            operation: operation.to_string(),
            outcome,
            status: Some(status),
            kind: None,
            detail: None,
            warnings: Vec::new(),
        }
    }

    pub fn from_error(
        protocol: ProtocolName,
        operation: &str,
        status: Option<ProtocolStatus>,
        error: &DaemonError,
    ) -> Self {
        let outcome = match error {
            DaemonError::OperationInProgress { .. } => Outcome::InProgress,
            _ => Outcome::Failed,
        };
        Self {
            protocol,
            operation: operation.to_string(),
            outcome,
            status,
            kind: Some(error.kind().to_string()),
            detail: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Accepted | Outcome::NoOp)
    }
}

// ---------------------------------------------------------------------------
// Protocol views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSummary {
    pub name: ProtocolName,
    pub display_name: String,
    pub default_port: u16,
    pub port: u16,
    pub status: ProtocolStatus,
    pub implemented: bool,
}

impl ProtocolSummary {
    pub fn new(descriptor: &ProtocolDescriptor, record: &ProtocolRecord, status: ProtocolStatus) -> Self {
        Self {
            name: descriptor.protocol_name(),
            display_name: descriptor.display_name.to_string(),
            default_port: descriptor.default_port,
            port: record.settings.port.unwrap_or(descriptor.default_port),
            status,
            implemented: !descriptor.is_stub(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolView {
    #[serde(flatten)]
    pub summary: ProtocolSummary,
    pub acl_model: &'static str,
    pub tls: bool,
    pub packages: Vec<String>,
    pub units: Vec<String>,
    pub record: ProtocolRecord,
    pub runtime: ProtocolRuntimeState,
    pub live_config: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftSignal>,
}

pub fn acl_model_name(model: AclModel) -> &'static str {
    match model {
        AclModel::PerShareUserLists => "per_share_user_lists",
        AclModel::PerUserRoot => "per_user_root",
        AclModel::PerUserPolicy => "per_user_policy",
        AclModel::None => "none",
    }
}

// ---------------------------------------------------------------------------
// Model edits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSharedPath {
    pub name: String,
    /// Absolute, or relative to the storage root.
    pub path: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub protocols: Vec<ProtocolName>,
}

/// `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedPathUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub protocols: Option<Vec<ProtocolName>>,
}

/// A committed model edit and the synchronization it triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathChange {
    pub path: SharedPath,
    pub sync: Vec<OperationReport>,
    /// The path is deleted but some protocol still exposes it.
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessChange {
    pub path_id: sharehost_core::PathId,
    pub user_id: UserId,
    /// `None` after a revoke.
    pub permission: Option<PermissionLevel>,
    pub changed: bool,
    pub sync: Vec<OperationReport>,
    /// The row is revoked but some protocol still grants it.
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChange {
    pub user: UserAccount,
    /// Explicit rows dropped because the user became an administrator.
    pub dropped_access: Vec<UserProtocolAccess>,
    pub sync: Vec<OperationReport>,
}
