//! # sharehost-sync
//!
//! Shared-path configuration synchronization.
//!
//! [`acl::translate`] turns the persisted paths and access rows into a
//! protocol's desired native configuration, [`apply_protocol`] pushes it
//! through the protocol's adapter, and [`diff::diff_protocol`] previews the
//! result without writing.

pub mod acl;
pub mod diff;
pub mod drift;
pub mod error;
pub mod synchronizer;

pub use acl::{effective_grants, translate, AccessModel, Translation};
pub use diff::{diff_protocol, FileDiff, ProtocolDiff};
pub use drift::{applied_age, DriftSignal};
pub use error::SyncError;
pub use synchronizer::{apply_protocol, is_synchronized, SyncOutcome};
