//! Protocol lifecycle orchestrator and its daemon runtime.
//!
//! [`Orchestrator`] is the synchronous facade: lifecycle operations behind a
//! per-protocol lock, shared-path and access edits, synchronization, audit
//! queries. The runtime serves it over a Unix socket, watches the record
//! directories and periodically reconciles recorded status with the host.

mod error;
pub mod lifecycle;
pub mod log_rotation;
pub mod orchestrator;
pub mod paths;
pub mod protocol;
pub mod report;
mod runtime;
pub mod service_unit;
mod shares;

pub use error::DaemonError;
pub use lifecycle::{Operation, Plan};
pub use orchestrator::Orchestrator;
pub use protocol::{request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse};
pub use report::{
    AccessChange, Caller, NewSharedPath, OperationReport, Outcome, PathChange, ProtocolSummary,
    ProtocolView, SharedPathUpdate, UserChange,
};
pub use runtime::{dispatch, run, start_blocking, SyncSummary};
pub use service_unit::{generate_unit, install as install_service, uninstall as uninstall_service};
