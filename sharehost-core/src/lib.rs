//! Sharehost core library: domain types, protocol catalog, record store,
//! settings and the audit recorder.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`RegistryError`], [`StoreError`]
//! - [`registry`]: static protocol descriptors
//! - [`store`]: YAML records under the state directory
//! - [`config`]: [`Settings`]
//! - [`audit`]: [`AuditRecorder`]

pub mod audit;
pub mod config;
pub mod error;
pub mod registry;
pub mod store;
pub mod types;

pub use audit::{AccessFilter, AccessSummary, AuditRecorder};
pub use config::Settings;
pub use error::{io_err, RegistryError, StoreError};
pub use registry::{AclModel, AdapterKind, ProtocolDescriptor};
pub use types::{
    AccessAction, AccessLogEntry, AccessOutcome, DesiredConfig, EventOutcome, LifecycleEvent,
    NativeGrant, PathId, PermissionLevel, ProtocolName, ProtocolRecord, ProtocolRuntimeState,
    ProtocolSettings, ProtocolStatus, ShareConfig, SharedPath, UserAccount, UserId,
    UserProtocolAccess, UserRoot, is_config_safe_path, is_valid_description, is_valid_path_name,
    is_valid_username,
};
