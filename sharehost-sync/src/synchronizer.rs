//! Apply the persisted model to one protocol.
//!
//! The caller owns locking and status bookkeeping; this module only turns
//! the model into native config and pushes it through the adapter.

use std::path::{Path, PathBuf};

use sharehost_adapters::{ApplyReport, ProtocolAdapter};
use sharehost_core::types::{ProtocolName, ProtocolRecord, ProtocolStatus};

use crate::acl::{translate, AccessModel};
use crate::SyncError;

/// Result of synchronizing one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub protocol: ProtocolName,
    pub report: ApplyReport,
    /// Approximations made while translating permissions.
    pub warnings: Vec<String>,
    pub reloaded: bool,
}

impl SyncOutcome {
    pub fn changed(&self) -> bool {
        self.report.changed()
    }
}

/// Statuses whose native config is kept in sync with the model.
pub fn is_synchronized(status: ProtocolStatus) -> bool {
    status.is_deployed()
}

/// Recompute `record`'s desired config from `model`, configure the adapter
/// and reload the daemon when it is running and something changed.
///
/// A configure failure leaves the previous live config in place. A reload
/// failure carries the backups of the replaced files.
pub fn apply_protocol(
    adapter: &dyn ProtocolAdapter,
    record: &ProtocolRecord,
    model: &AccessModel,
    storage_root: &Path,
    dry_run: bool,
) -> Result<SyncOutcome, SyncError> {
    let descriptor = adapter.descriptor();
    let translation = translate(descriptor, record, storage_root, model);
    for warning in &translation.warnings {
        tracing::warn!("{}: {warning}", descriptor.name);
    }

    let report = adapter
        .configure(&translation.desired, dry_run)
        .map_err(SyncError::Configure)?;

    let mut reloaded = false;
    if !dry_run && report.changed() && record.status == ProtocolStatus::Running {
        if let Err(source) = adapter.reload() {
            let rollback_candidates: Vec<PathBuf> = report.backups();
            tracing::error!(
                "{}: reload rejected new config ({source}); {} backup(s) kept",
                descriptor.name,
                rollback_candidates.len()
            );
            return Err(SyncError::Reload {
                source,
                rollback_candidates,
            });
        }
        reloaded = true;
    }

    if report.changed() {
        tracing::info!(
            "{}: {} file(s) written, {} pruned{}",
            descriptor.name,
            report
                .writes
                .iter()
                .filter(|w| matches!(w, sharehost_adapters::WriteResult::Written { .. }))
                .count(),
            report.pruned.len(),
            if reloaded { ", reloaded" } else { "" }
        );
    } else {
        tracing::debug!("{}: native config already current", descriptor.name);
    }

    Ok(SyncOutcome {
        protocol: descriptor.protocol_name(),
        report,
        warnings: translation.warnings,
        reloaded,
    })
}
