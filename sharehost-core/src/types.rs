//! Domain types for the sharehost orchestrator.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All persisted types are serializable/deserializable via serde + serde_yaml.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed protocol key (`ftp`, `sftp`, `smb`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolName(pub String);

impl ProtocolName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProtocolName {
    fn from(s: String) -> Self {
        Self(s.to_ascii_lowercase())
    }
}

impl From<&str> for ProtocolName {
    fn from(s: &str) -> Self {
        Self(s.to_ascii_lowercase())
    }
}

/// Identifier of a user owned by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Generated identifier of a shared path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(pub String);

impl PathId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PathId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PathId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a protocol daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolStatus {
    #[default]
    Uninstalled,
    Installing,
    Installed,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ProtocolStatus {
    /// Package present: `installed`, `stopped` or `running`.
    ///
    /// Shared paths may only be exposed through deployed protocols, and only
    /// deployed protocols receive synchronized configuration.
    pub fn is_deployed(self) -> bool {
        matches!(
            self,
            ProtocolStatus::Installed | ProtocolStatus::Stopped | ProtocolStatus::Running
        )
    }

    /// Observable only while an operation is in flight.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ProtocolStatus::Installing | ProtocolStatus::Starting | ProtocolStatus::Stopping
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolStatus::Uninstalled => "uninstalled",
            ProtocolStatus::Installing => "installing",
            ProtocolStatus::Installed => "installed",
            ProtocolStatus::Starting => "starting",
            ProtocolStatus::Running => "running",
            ProtocolStatus::Stopping => "stopping",
            ProtocolStatus::Stopped => "stopped",
            ProtocolStatus::Error => "error",
        }
    }
}

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract permission level on a shared path.
///
/// Ordered from least to most privileged so `min()` picks the least-privileged
/// level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    #[default]
    Read,
    Write,
    Full,
}

impl PermissionLevel {
    pub fn can_write(self) -> bool {
        self >= PermissionLevel::Write
    }

    pub fn can_delete(self) -> bool {
        self == PermissionLevel::Full
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::Full => "full",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(PermissionLevel::Read),
            "write" => Ok(PermissionLevel::Write),
            "full" => Ok(PermissionLevel::Full),
            other => Err(format!(
                "unknown permission '{other}'; expected: read, write, full"
            )),
        }
    }
}

/// Action recorded in an access log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessAction {
    Login,
    Logout,
    Upload,
    Download,
    Delete,
    Rename,
    Mkdir,
    Rmdir,
    List,
    Chmod,
}

impl AccessAction {
    pub fn all() -> &'static [AccessAction] {
        &[
            AccessAction::Login,
            AccessAction::Logout,
            AccessAction::Upload,
            AccessAction::Download,
            AccessAction::Delete,
            AccessAction::Rename,
            AccessAction::Mkdir,
            AccessAction::Rmdir,
            AccessAction::List,
            AccessAction::Chmod,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessAction::Login => "login",
            AccessAction::Logout => "logout",
            AccessAction::Upload => "upload",
            AccessAction::Download => "download",
            AccessAction::Delete => "delete",
            AccessAction::Rename => "rename",
            AccessAction::Mkdir => "mkdir",
            AccessAction::Rmdir => "rmdir",
            AccessAction::List => "list",
            AccessAction::Chmod => "chmod",
        }
    }
}

impl std::str::FromStr for AccessAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        AccessAction::all()
            .iter()
            .copied()
            .find(|a| a.as_str() == lower)
            .ok_or_else(|| format!("unknown access action '{s}'"))
    }
}

/// Outcome of an access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    Success,
    Failed,
    Denied,
}

impl AccessOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessOutcome::Success => "success",
            AccessOutcome::Failed => "failed",
            AccessOutcome::Denied => "denied",
        }
    }
}

impl std::str::FromStr for AccessOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(AccessOutcome::Success),
            "failed" => Ok(AccessOutcome::Failed),
            "denied" => Ok(AccessOutcome::Denied),
            other => Err(format!("unknown access outcome '{other}'")),
        }
    }
}

/// Outcome of an orchestrator lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Success,
    NoOp,
    Failed,
    Warning,
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// Operator-tunable settings of a protocol (the `update_config` payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProtocolSettings {
    /// Listen port override; `None` uses the registry default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub tls_enabled: bool,
    /// Require TLS for logins and data (FTP only).
    #[serde(default)]
    pub force_tls: bool,
    /// Passive data port range (FTP only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passive_port_range: Option<(u16, u16)>,
    /// Free-form protocol-specific options rendered verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Durable per-protocol record: status, last error, settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRecord {
    pub name: ProtocolName,
    pub status: ProtocolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settings: ProtocolSettings,
    pub updated_at: DateTime<Utc>,
}

impl ProtocolRecord {
    /// A never-touched protocol: `uninstalled`, default settings.
    pub fn new(name: ProtocolName) -> Self {
        Self {
            name,
            status: ProtocolStatus::Uninstalled,
            last_error: None,
            installed_version: None,
            installed_at: None,
            settings: ProtocolSettings::default(),
            updated_at: Utc::now(),
        }
    }
}

/// A directory exposed through one or more protocols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedPath {
    pub id: PathId,
    pub name: String,
    /// Absolute path on disk, inside the configured storage root.
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub protocols: Vec<ProtocolName>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the path was deleted but some protocol still exposes it
    /// natively. The record is removed once every protocol has dropped it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SharedPath {
    pub fn exposes(&self, protocol: &ProtocolName) -> bool {
        self.protocols.iter().any(|p| p == protocol)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Explicit permission of a non-admin user on a shared path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProtocolAccess {
    pub user_id: UserId,
    pub path_id: PathId,
    pub permission: PermissionLevel,
    pub created_at: DateTime<Utc>,
    /// Set by a revoke. The row grants nothing from then on and is removed
    /// once every protocol on the path has applied the removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl UserProtocolAccess {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Read model of a user owned by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    /// Login name used in every protocol's native configuration.
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Append-only record of a file-level access through a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub protocol: ProtocolName,
    pub action: AccessAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub source_addr: String,
    pub outcome: AccessOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of an orchestrator lifecycle or synchronization event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub protocol: ProtocolName,
    /// `install`, `start`, `stop`, `update_config`, `sync`, `acl_translation`, ...
    pub operation: String,
    pub outcome: EventOutcome,
    pub status: ProtocolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Transient per-protocol state owned by the lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRuntimeState {
    pub name: ProtocolName,
    pub status: ProtocolStatus,
    pub last_transition: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Token of the operation currently holding the protocol lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<String>,
    /// Last-known-good native config kept after a failed reload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_candidate: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Desired native configuration
// ---------------------------------------------------------------------------

/// A single user's effective grant on a share, after translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeGrant {
    pub username: String,
    pub level: PermissionLevel,
    /// Granted through the implicit administrator rule, not a stored row.
    pub implicit_admin: bool,
}

/// One shared path as seen by one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareConfig {
    pub id: PathId,
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sorted by username.
    pub grants: Vec<NativeGrant>,
}

/// Per-user chroot for protocols that give each user a single root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoot {
    pub username: String,
    pub root: PathBuf,
    pub level: PermissionLevel,
    pub is_admin: bool,
}

/// Full desired configuration of one protocol, computed from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub protocol: ProtocolName,
    pub port: u16,
    pub settings: ProtocolSettings,
    pub storage_root: PathBuf,
    /// Sorted by share name.
    pub shares: Vec<ShareConfig>,
    /// Filled only for per-user-root protocols; sorted by username.
    #[serde(default)]
    pub user_roots: Vec<UserRoot>,
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

/// POSIX-portable login name: `[a-z_][a-z0-9_.-]{0,31}`. Names end up
/// verbatim in native config files, so nothing else is accepted.
pub fn is_valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 32
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
}

/// Display name of a shared path: 1 to 100 characters, no control
/// characters and no brackets (it becomes an smb.conf section header).
pub fn is_valid_path_name(name: &str) -> bool {
    let len = name.chars().count();
    (1..=100).contains(&len)
        && name.trim() == name
        && !name.chars().any(|c| c.is_control() || matches!(c, '[' | ']'))
}

/// Free text rendered into a native config value (share comments): no
/// control characters, at most 256 characters.
pub fn is_valid_description(text: &str) -> bool {
    text.chars().count() <= 256 && !text.chars().any(char::is_control)
}

/// A share directory as it is written into native configs: valid UTF-8 and
/// no control characters in any component.
pub fn is_config_safe_path(path: &Path) -> bool {
    path.components().all(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|part| !part.chars().any(char::is_control))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(ProtocolName::from("ftp").to_string(), "ftp");
        assert_eq!(UserId::from("u-1").to_string(), "u-1");
        assert_eq!(PathId::from("p-1").to_string(), "p-1");
    }

    #[test]
    fn protocol_name_is_lowercased() {
        assert_eq!(ProtocolName::from("SMB"), ProtocolName::from("smb"));
    }

    #[test]
    fn generated_path_ids_are_unique() {
        assert_ne!(PathId::generate(), PathId::generate());
    }

    #[test]
    fn permission_levels_are_ordered_by_privilege() {
        assert!(PermissionLevel::Read < PermissionLevel::Write);
        assert!(PermissionLevel::Write < PermissionLevel::Full);
        assert_eq!(
            PermissionLevel::Full.min(PermissionLevel::Read),
            PermissionLevel::Read
        );
        assert!(!PermissionLevel::Write.can_delete());
        assert!(PermissionLevel::Write.can_write());
    }

    #[test]
    fn deployed_statuses() {
        assert!(ProtocolStatus::Installed.is_deployed());
        assert!(ProtocolStatus::Stopped.is_deployed());
        assert!(ProtocolStatus::Running.is_deployed());
        assert!(!ProtocolStatus::Error.is_deployed());
        assert!(!ProtocolStatus::Installing.is_deployed());
    }

    #[test]
    fn status_serializes_lowercase() {
        let yaml = serde_yaml::to_string(&ProtocolStatus::Running).expect("serialize");
        assert_eq!(yaml.trim(), "running");
    }

    #[test]
    fn access_action_parses_case_insensitively() {
        assert_eq!("MKDIR".parse::<AccessAction>(), Ok(AccessAction::Mkdir));
        assert!("teleport".parse::<AccessAction>().is_err());
    }

    #[test]
    fn user_account_defaults_to_active() {
        let user: UserAccount =
            serde_yaml::from_str("id: u1\nusername: alice\n").expect("deserialize");
        assert!(user.is_active);
        assert!(!user.is_admin);
    }

    #[test]
    fn username_validation() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("_svc.backup-1"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("Alice"));
        assert!(!is_valid_username("1alice"));
        assert!(!is_valid_username("alice bob"));
        assert!(!is_valid_username("alice\nMatch all"));
        assert!(!is_valid_username(&"a".repeat(33)));
    }

    #[test]
    fn path_name_validation() {
        assert!(is_valid_path_name("Public"));
        assert!(is_valid_path_name("Team Docs 2026"));
        assert!(!is_valid_path_name(""));
        assert!(!is_valid_path_name(" padded"));
        assert!(!is_valid_path_name("evil]\n[global"));
        assert!(!is_valid_path_name(&"x".repeat(101)));
    }

    #[test]
    fn rendered_text_rejects_line_breaks() {
        assert!(is_valid_description("Scans from the office printer"));
        assert!(is_valid_description(""));
        assert!(!is_valid_description("x\n   admin users = bob"));
        assert!(!is_valid_description("tab\tseparated"));
        assert!(!is_valid_description(&"d".repeat(257)));

        assert!(is_config_safe_path(Path::new("/srv/sharehost/team docs")));
        assert!(!is_config_safe_path(Path::new("public\nlocal_root=/")));
        assert!(!is_config_safe_path(Path::new("/srv/sharehost/a\rb")));
    }

    #[test]
    fn tombstone_fields_are_optional_in_yaml() {
        let row: UserProtocolAccess = serde_yaml::from_str(
            "user_id: u1\npath_id: p1\npermission: read\ncreated_at: 2026-01-01T00:00:00Z\n",
        )
        .expect("deserialize");
        assert!(!row.is_revoked());
        let yaml = serde_yaml::to_string(&row).expect("serialize");
        assert!(!yaml.contains("revoked_at"));
    }
}
