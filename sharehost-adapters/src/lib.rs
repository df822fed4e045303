//! # sharehost-adapters
//!
//! Drives the external daemons behind each protocol: package installation,
//! staged native-config replacement, and service supervision through
//! `systemctl` or a pid file.
//!
//! Every external program runs through a [`CommandRunner`], so adapters can
//! be exercised against a scripted runner instead of the host.

pub mod adapter;
pub mod error;
pub mod ftp;
pub mod hash_store;
pub mod package;
pub mod probe;
pub mod process;
pub mod runner;
pub mod s3;
pub mod sftp;
pub mod smb;
pub mod stub;
pub mod supervisor;
pub mod writer;

pub use adapter::{build_adapter, AdapterContext, InstallOutcome, ProbedStatus, ProtocolAdapter};
pub use error::AdapterError;
pub use package::PackageInstaller;
pub use probe::{HealthCheck, TcpHealthCheck};
pub use process::{ProcessSpec, ProcessSupervisor};
pub use runner::{CommandOutput, CommandRunner, SpawnSpec, SystemRunner};
pub use supervisor::{ServiceManager, Systemd, UnitState};
pub use writer::{ApplyReport, WriteResult};
