//! The orchestrator facade: every operation the dashboard, CLI and socket
//! expose, guarded by the per-protocol lock table.
//!
//! Operations are synchronous. The runtime calls them from
//! `spawn_blocking`; tests call them directly with fake adapters.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use sharehost_adapters::{build_adapter, AdapterContext, AdapterError, ProbedStatus, ProtocolAdapter};
use sharehost_core::audit::{AccessFilter, AccessSummary};
use sharehost_core::registry::{self, ProtocolDescriptor};
use sharehost_core::{
    store, AccessLogEntry, AuditRecorder, EventOutcome, LifecycleEvent, ProtocolName,
    ProtocolRecord, ProtocolRuntimeState, ProtocolSettings, ProtocolStatus, RegistryError,
    Settings,
};
use sharehost_sync::{apply_protocol, drift, is_synchronized, AccessModel, SyncError, SyncOutcome};

use crate::error::DaemonError;
use crate::lifecycle::{plan, LockTable, Operation, OperationGuard, Plan, ProtocolSlot};
use crate::report::{
    acl_model_name, Caller, OperationReport, Outcome, ProtocolSummary, ProtocolView,
};

pub struct Orchestrator {
    pub(crate) state_dir: PathBuf,
    pub(crate) settings: Settings,
    adapters: HashMap<ProtocolName, Box<dyn ProtocolAdapter>>,
    locks: LockTable,
    pub(crate) audit: AuditRecorder,
}

/// One resolved protocol: catalog entry, adapter and lock slot.
pub(crate) struct Target<'a> {
    pub(crate) descriptor: &'static ProtocolDescriptor,
    pub(crate) adapter: &'a dyn ProtocolAdapter,
    pub(crate) slot: &'a ProtocolSlot,
}

/// How a failed step leaves the protocol.
pub(crate) enum Failure {
    /// Nothing changed on the host; the previous status stands.
    Rejected(DaemonError),
    /// The host was touched; the protocol moves to `error`.
    Failed {
        error: DaemonError,
        rollback: Option<PathBuf>,
    },
}

impl From<AdapterError> for Failure {
    fn from(e: AdapterError) -> Self {
        Failure::Failed {
            error: e.into(),
            rollback: None,
        }
    }
}

impl Failure {
    fn from_sync(err: SyncError) -> Self {
        let rollback = match &err {
            SyncError::Reload {
                rollback_candidates,
                ..
            } => rollback_candidates.first().cloned(),
            _ => None,
        };
        Failure::Failed {
            error: err.into(),
            rollback,
        }
    }

    /// Config that never went live is a rejection, not a failure.
    fn reject_config(err: SyncError) -> Self {
        match err {
            SyncError::Configure(_) | SyncError::Store(_) => Failure::Rejected(err.into()),
            other => Failure::from_sync(other),
        }
    }
}

pub(crate) fn require_admin(caller: &Caller, operation: &'static str) -> Result<(), DaemonError> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(DaemonError::Forbidden { operation })
    }
}

impl Orchestrator {
    /// Orchestrator over explicit adapters. Records left in a transient
    /// status by a crash are moved to `error`.
    pub fn new(
        state_dir: PathBuf,
        settings: Settings,
        adapters: Vec<Box<dyn ProtocolAdapter>>,
    ) -> Result<Self, DaemonError> {
        store::ensure_dir(&state_dir)?;
        let mut records = Vec::new();
        for descriptor in registry::list_all() {
            let mut record = store::load_protocol_at(&state_dir, &descriptor.protocol_name())?;
            if record.status.is_transient() {
                tracing::warn!(
                    protocol = %record.name,
                    status = %record.status,
                    "operation was interrupted; marking protocol as error"
                );
                record.last_error = Some(format!("{} was interrupted by a restart", record.status));
                record.status = ProtocolStatus::Error;
                record.updated_at = Utc::now();
                store::save_protocol_at(&state_dir, &record)?;
            }
            records.push(record);
        }

        let adapters = adapters
            .into_iter()
            .map(|a| (a.descriptor().protocol_name(), a))
            .collect();
        Ok(Self {
            audit: AuditRecorder::new(&state_dir),
            locks: LockTable::new(&records),
            state_dir,
            settings,
            adapters,
        })
    }

    /// Orchestrator driving the real host.
    pub fn system(state_dir: PathBuf, settings: Settings) -> Result<Self, DaemonError> {
        let ctx = Arc::new(AdapterContext::system(settings.clone(), state_dir.clone())?);
        let adapters = registry::list_all()
            .iter()
            .map(|d| build_adapter(d, ctx.clone()))
            .collect();
        Self::new(state_dir, settings, adapters)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn target(&self, name: &str) -> Result<Target<'_>, DaemonError> {
        let descriptor = registry::describe(name)?;
        let key = descriptor.protocol_name();
        match (self.adapters.get(&key), self.locks.get(&key)) {
            (Some(adapter), Some(slot)) => Ok(Target {
                descriptor,
                adapter: adapter.as_ref(),
                slot,
            }),
            _ => Err(RegistryError::UnknownProtocol {
                name: name.to_string(),
                known: self
                    .adapters
                    .keys()
                    .map(|k| k.0.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into()),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Catalog order, with live status.
    pub fn list_protocols(&self, _caller: &Caller) -> Vec<ProtocolSummary> {
        registry::list_all()
            .iter()
            .filter_map(|d| {
                let target = self.target(d.name).ok()?;
                let record = self.load_record(&d.protocol_name());
                Some(ProtocolSummary::new(d, &record, target.slot.status()))
            })
            .collect()
    }

    pub fn get_protocol(&self, _caller: &Caller, name: &str) -> Result<ProtocolView, DaemonError> {
        let t = self.target(name)?;
        let record = self.load_record(&t.descriptor.protocol_name());
        let runtime = t.slot.snapshot();
        let drift = if is_synchronized(runtime.status) {
            drift::check(&self.state_dir, t.descriptor.name).ok()
        } else {
            None
        };
        Ok(ProtocolView {
            summary: ProtocolSummary::new(t.descriptor, &record, runtime.status),
            acl_model: acl_model_name(t.descriptor.capabilities.acl),
            tls: t.descriptor.capabilities.tls,
            packages: t.descriptor.packages.iter().map(|p| p.to_string()).collect(),
            units: t.descriptor.units.iter().map(|u| u.to_string()).collect(),
            live_config: t.adapter.live_config_paths(),
            record,
            runtime,
            drift,
        })
    }

    /// Never waits on an in-flight operation.
    pub fn get_status(&self, _caller: &Caller, name: &str) -> Result<ProtocolRuntimeState, DaemonError> {
        Ok(self.target(name)?.slot.snapshot())
    }

    fn load_record(&self, name: &ProtocolName) -> ProtocolRecord {
        store::load_protocol_at(&self.state_dir, name).unwrap_or_else(|e| {
            tracing::warn!(protocol = %name, error = %e, "unreadable protocol record");
            ProtocolRecord::new(name.clone())
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn install(&self, caller: &Caller, name: &str) -> OperationReport {
        self.run_lifecycle(caller, name, Operation::Install, |t, record| {
            let outcome = t.adapter.install()?;
            record.installed_version = match outcome.version {
                Some(v) => Some(v),
                None => t.adapter.installed_version().ok().flatten(),
            };
            record.installed_at = Some(Utc::now());
            record.status = ProtocolStatus::Installed;
            // Initial population of the native config.
            let outcome = self.apply_config(t, record, false).map_err(Failure::from_sync)?;
            Ok(all_warnings(outcome))
        })
    }

    pub fn start(&self, caller: &Caller, name: &str) -> OperationReport {
        self.run_lifecycle(caller, name, Operation::Start, |t, record| {
            let outcome = self
                .apply_config(t, record, false)
                .map_err(Failure::reject_config)?;
            t.adapter.start()?;
            Ok(all_warnings(outcome))
        })
    }

    pub fn stop(&self, caller: &Caller, name: &str) -> OperationReport {
        self.run_lifecycle(caller, name, Operation::Stop, |t, _record| {
            t.adapter.stop()?;
            Ok(Vec::new())
        })
    }

    /// Blocked with `ProtocolInUse` while any shared path lists the protocol.
    pub fn uninstall(&self, caller: &Caller, name: &str) -> OperationReport {
        self.run_lifecycle(caller, name, Operation::Uninstall, |t, record| {
            self.ensure_unused(&record.name).map_err(Failure::Rejected)?;
            t.adapter.uninstall()?;
            record.installed_version = None;
            record.installed_at = None;
            Ok(Vec::new())
        })
    }

    /// Leave `error` for `uninstalled` without touching packages, so a
    /// following `install` re-verifies the host.
    pub fn reset(&self, caller: &Caller, name: &str) -> OperationReport {
        self.run_lifecycle(caller, name, Operation::Reset, |t, _record| {
            let mut warnings = Vec::new();
            if let Err(e) = t.adapter.stop() {
                warnings.push(format!("stopping the daemon during reset failed: {e}"));
            }
            Ok(warnings)
        })
    }

    /// Persist new settings once the config they produce is live. A rejected
    /// config leaves both the settings and the status untouched.
    pub fn update_config(&self, caller: &Caller, name: &str, settings: ProtocolSettings) -> OperationReport {
        self.run_lifecycle(caller, name, Operation::UpdateConfig, move |t, record| {
            validate_settings(&settings).map_err(Failure::Rejected)?;
            let mut candidate = record.clone();
            candidate.settings = settings;
            match self.apply_config(t, &candidate, false) {
                Ok(outcome) => {
                    record.settings = candidate.settings;
                    Ok(all_warnings(outcome))
                }
                Err(e @ SyncError::Reload { .. }) => {
                    record.settings = candidate.settings;
                    Err(Failure::from_sync(e))
                }
                Err(e) => Err(Failure::Rejected(e.into())),
            }
        })
    }

    fn run_lifecycle<F>(&self, caller: &Caller, name: &str, op: Operation, body: F) -> OperationReport
    where
        F: FnOnce(&Target<'_>, &mut ProtocolRecord) -> Result<Vec<String>, Failure>,
    {
        let report = self.lifecycle_locked(caller, name, op, body);
        if let Ok(t) = self.target(name) {
            self.drain_pending(&t);
        }
        report
    }

    fn lifecycle_locked<F>(&self, caller: &Caller, name: &str, op: Operation, body: F) -> OperationReport
    where
        F: FnOnce(&Target<'_>, &mut ProtocolRecord) -> Result<Vec<String>, Failure>,
    {
        let op_name = op.as_str();
        let requested = ProtocolName::from(name);
        if let Err(e) = require_admin(caller, op_name) {
            return OperationReport::from_error(requested, op_name, None, &e);
        }
        let t = match self.target(name) {
            Ok(t) => t,
            Err(e) => return OperationReport::from_error(requested, op_name, None, &e),
        };
        let protocol = t.descriptor.protocol_name();

        let Some(guard) = t.slot.try_begin(op_name) else {
            let err = DaemonError::OperationInProgress {
                protocol: protocol.clone(),
                operation: t.slot.in_flight().unwrap_or_default(),
            };
            return OperationReport::from_error(protocol, op_name, Some(t.slot.status()), &err);
        };
        let started = Instant::now();
        let before = t.slot.status();

        let mut record = match store::load_protocol_at(&self.state_dir, &protocol) {
            Ok(r) => r,
            Err(e) => return OperationReport::from_error(protocol, op_name, Some(before), &e.into()),
        };
        record.status = before;

        match plan(op, before) {
            Plan::Invalid => {
                let err = DaemonError::InvalidTransition {
                    protocol: protocol.clone(),
                    operation: op_name,
                    status: before,
                };
                self.event(&protocol, op_name, EventOutcome::Failed, before, Some(err.to_string()), Some(started));
                OperationReport::from_error(protocol, op_name, Some(before), &err)
            }
            Plan::NoOp => {
                self.event(&protocol, op_name, EventOutcome::NoOp, before, None, Some(started));
                OperationReport::new(protocol, op_name, Outcome::NoOp, before)
            }
            Plan::Run { transient, success } => {
                if let Some(transient) = transient {
                    guard.set_status(transient);
                }
                tracing::info!(protocol = %protocol, operation = op_name, from = %before, "operation started");
                match body(&t, &mut record) {
                    Ok(warnings) => {
                        record.status = success;
                        record.last_error = None;
                        record.updated_at = Utc::now();
                        guard.set_status(success);
                        let mut report = OperationReport::new(protocol.clone(), op_name, Outcome::Accepted, success)
                            .with_warnings(warnings);
                        if let Err(e) = store::save_protocol_at(&self.state_dir, &record) {
                            tracing::error!(protocol = %protocol, error = %e, "could not persist protocol record");
                            report = report.with_detail(format!("status not persisted: {e}"));
                        }
                        self.event(&protocol, op_name, EventOutcome::Success, success, None, Some(started));
                        tracing::info!(protocol = %protocol, operation = op_name, status = %success, "operation completed");
                        report
                    }
                    Err(Failure::Rejected(err)) => {
                        guard.set_status(before);
                        self.event(&protocol, op_name, EventOutcome::Failed, before, Some(err.to_string()), Some(started));
                        tracing::warn!(protocol = %protocol, operation = op_name, error = %err, "operation rejected");
                        OperationReport::from_error(protocol, op_name, Some(before), &err)
                    }
                    Err(Failure::Failed { error, rollback }) => {
                        self.record_failure(&guard, &mut record, op_name, &error, rollback, started)
                    }
                }
            }
        }
    }

    /// Move to `error`, persist, audit.
    fn record_failure(
        &self,
        guard: &OperationGuard<'_>,
        record: &mut ProtocolRecord,
        op_name: &str,
        error: &DaemonError,
        rollback: Option<PathBuf>,
        started: Instant,
    ) -> OperationReport {
        let detail = error.to_string();
        guard.fail(detail.clone(), rollback.clone());
        record.status = ProtocolStatus::Error;
        record.last_error = Some(detail.clone());
        record.updated_at = Utc::now();
        if let Err(e) = store::save_protocol_at(&self.state_dir, record) {
            tracing::error!(protocol = %record.name, error = %e, "could not persist protocol record");
        }
        let detail = match &rollback {
            Some(path) => format!("{detail}; previous config kept at {}", path.display()),
            None => detail,
        };
        self.event(&record.name, op_name, EventOutcome::Failed, ProtocolStatus::Error, Some(detail), Some(started));
        tracing::error!(protocol = %record.name, operation = op_name, kind = error.kind(), error = %error, "operation failed");
        OperationReport::from_error(record.name.clone(), op_name, Some(ProtocolStatus::Error), error)
    }

    fn ensure_unused(&self, protocol: &ProtocolName) -> Result<(), DaemonError> {
        let users: Vec<String> = store::list_shared_paths_at(&self.state_dir)?
            .into_iter()
            .filter(|p| !p.is_deleted() && p.exposes(protocol))
            .map(|p| p.name)
            .collect();
        if users.is_empty() {
            Ok(())
        } else {
            Err(DaemonError::ProtocolInUse {
                protocol: protocol.clone(),
                paths: users.join(", "),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Compare the recorded status with what the host reports.
    pub fn reconcile(&self, caller: &Caller, name: &str) -> OperationReport {
        if let Err(e) = require_admin(caller, "reconcile") {
            return OperationReport::from_error(ProtocolName::from(name), "reconcile", None, &e);
        }
        let t = match self.target(name) {
            Ok(t) => t,
            Err(e) => return OperationReport::from_error(ProtocolName::from(name), "reconcile", None, &e),
        };
        let report = self.reconcile_one(&t);
        self.drain_pending(&t);
        report
    }

    /// Periodic pass over every deployed protocol.
    pub fn reconcile_all(&self) -> Vec<OperationReport> {
        registry::list_all()
            .iter()
            .filter(|d| !d.is_stub())
            .filter_map(|d| self.target(d.name).ok())
            .filter(|t| t.slot.status().is_deployed())
            .map(|t| {
                let report = self.reconcile_one(&t);
                self.drain_pending(&t);
                report
            })
            .collect()
    }

    fn reconcile_one(&self, t: &Target<'_>) -> OperationReport {
        let op_name = "reconcile";
        let protocol = t.descriptor.protocol_name();
        let Some(guard) = t.slot.try_begin(op_name) else {
            let err = DaemonError::OperationInProgress {
                protocol: protocol.clone(),
                operation: t.slot.in_flight().unwrap_or_default(),
            };
            return OperationReport::from_error(protocol, op_name, Some(t.slot.status()), &err);
        };
        let started = Instant::now();
        let current = t.slot.status();
        let mut record = self.load_record(&protocol);
        record.status = current;

        let port = record.settings.port.unwrap_or(t.descriptor.default_port);
        let probed = match t.adapter.probe_status(port) {
            Ok(p) => p,
            Err(e) => return OperationReport::from_error(protocol, op_name, Some(current), &e.into()),
        };

        match (current, &probed) {
            (ProtocolStatus::Running, p) if !p.is_serving() => {
                let detail = format!("drift: recorded running but the daemon is {}", describe_probe(p));
                guard.fail(detail.clone(), None);
                record.status = ProtocolStatus::Error;
                record.last_error = Some(detail.clone());
                record.updated_at = Utc::now();
                self.persist(&record);
                self.event(&protocol, op_name, EventOutcome::Warning, ProtocolStatus::Error, Some(detail.clone()), Some(started));
                tracing::warn!(protocol = %protocol, detail = %detail, "status drift");
                OperationReport::new(protocol, op_name, Outcome::Accepted, ProtocolStatus::Error).with_detail(detail)
            }
            (ProtocolStatus::Installed | ProtocolStatus::Stopped, ProbedStatus::Running) => {
                guard.set_status(ProtocolStatus::Running);
                record.status = ProtocolStatus::Running;
                record.updated_at = Utc::now();
                self.persist(&record);
                let detail = format!("drift: recorded {current} but the daemon is serving");
                self.event(&protocol, op_name, EventOutcome::Warning, ProtocolStatus::Running, Some(detail.clone()), Some(started));
                tracing::info!(protocol = %protocol, detail = %detail, "status drift");
                OperationReport::new(protocol, op_name, Outcome::Accepted, ProtocolStatus::Running).with_detail(detail)
            }
            _ => OperationReport::new(protocol, op_name, Outcome::NoOp, current),
        }
    }

    fn persist(&self, record: &ProtocolRecord) {
        if let Err(e) = store::save_protocol_at(&self.state_dir, record) {
            tracing::error!(protocol = %record.name, error = %e, "could not persist protocol record");
        }
    }

    // -----------------------------------------------------------------------
    // Synchronization
    // -----------------------------------------------------------------------

    /// Translate the persisted model and push it through the adapter.
    fn apply_config(
        &self,
        t: &Target<'_>,
        record: &ProtocolRecord,
        dry_run: bool,
    ) -> Result<SyncOutcome, SyncError> {
        let model = AccessModel::load_at(&self.state_dir)?;
        let outcome = apply_protocol(t.adapter, record, &model, &self.settings.storage_root, dry_run)?;
        if !dry_run {
            for warning in &outcome.warnings {
                self.event(
                    &record.name,
                    "acl_translation",
                    EventOutcome::Warning,
                    record.status,
                    Some(format!("ACLTranslationWarning: {warning}")),
                    None,
                );
            }
        }
        Ok(outcome)
    }

    /// Synchronize each listed protocol that is deployed, in catalog order.
    /// A busy protocol is marked for resynchronization by its lock holder.
    pub(crate) fn synchronize<I>(&self, protocols: I, dry_run: bool) -> Vec<OperationReport>
    where
        I: IntoIterator<Item = ProtocolName>,
    {
        let wanted: BTreeSet<ProtocolName> = protocols.into_iter().collect();
        let mut reports = Vec::new();
        for descriptor in registry::list_all() {
            if !wanted.contains(&descriptor.protocol_name()) {
                continue;
            }
            let Ok(t) = self.target(descriptor.name) else {
                continue;
            };
            if let Some(report) = self.sync_one(&t, dry_run) {
                reports.push(report);
            }
            if !dry_run {
                self.drain_pending(&t);
            }
        }
        if !dry_run {
            if let Err(err) = self.settle_removals(&reports) {
                tracing::warn!(kind = err.kind(), error = %err, "could not purge applied removals");
            }
        }
        reports
    }

    pub(crate) fn all_protocols() -> impl Iterator<Item = ProtocolName> {
        registry::list_all().iter().map(|d| d.protocol_name())
    }

    fn sync_one(&self, t: &Target<'_>, dry_run: bool) -> Option<OperationReport> {
        let status = t.slot.status();
        if !is_synchronized(status) {
            return None;
        }
        let Some(guard) = t.slot.try_begin("sync") else {
            if !dry_run {
                t.slot.mark_resync();
            }
            let protocol = t.descriptor.protocol_name();
            let err = DaemonError::OperationInProgress {
                protocol: protocol.clone(),
                operation: t.slot.in_flight().unwrap_or_default(),
            };
            return Some(
                OperationReport::from_error(protocol, "sync", Some(status), &err)
                    .with_detail("resynchronization queued behind the running operation"),
            );
        };
        Some(self.sync_locked(t, &guard, dry_run))
    }

    fn sync_locked(&self, t: &Target<'_>, guard: &OperationGuard<'_>, dry_run: bool) -> OperationReport {
        let started = Instant::now();
        let protocol = t.descriptor.protocol_name();
        let status = t.slot.status();
        if !is_synchronized(status) {
            return OperationReport::new(protocol, "sync", Outcome::NoOp, status);
        }
        let mut record = self.load_record(&protocol);
        record.status = status;

        match self.apply_config(t, &record, dry_run) {
            Ok(outcome) => {
                let changed = outcome.changed() || outcome.report.would_change();
                if changed && !dry_run {
                    self.event(&protocol, "sync", EventOutcome::Success, status, None, Some(started));
                }
                let outcome_kind = if changed { Outcome::Accepted } else { Outcome::NoOp };
                OperationReport::new(protocol, "sync", outcome_kind, status).with_warnings(all_warnings(outcome))
            }
            Err(err) if dry_run => OperationReport::from_error(protocol, "sync", Some(status), &err.into()),
            Err(err) => match Failure::from_sync(err) {
                Failure::Failed { error, rollback } => {
                    self.record_failure(guard, &mut record, "sync", &error, rollback, started)
                }
                Failure::Rejected(error) => OperationReport::from_error(protocol, "sync", Some(status), &error),
            },
        }
    }

    /// Run resynchronizations requested while the lock was held.
    fn drain_pending(&self, t: &Target<'_>) {
        while t.slot.take_resync() {
            let Some(guard) = t.slot.try_begin("sync") else {
                // The new holder drains it when it finishes.
                t.slot.mark_resync();
                return;
            };
            let report = self.sync_locked(t, &guard, false);
            tracing::debug!(protocol = %report.protocol, outcome = ?report.outcome, "pending resynchronization applied");
        }
    }

    // -----------------------------------------------------------------------
    // Audit and logs
    // -----------------------------------------------------------------------

    pub(crate) fn event(
        &self,
        protocol: &ProtocolName,
        operation: &str,
        outcome: EventOutcome,
        status: ProtocolStatus,
        detail: Option<String>,
        started: Option<Instant>,
    ) {
        self.audit.record_event(&LifecycleEvent {
            protocol: protocol.clone(),
            operation: operation.to_string(),
            outcome,
            status,
            detail,
            duration_ms: started.map_or(0, |s| s.elapsed().as_millis() as u64),
            timestamp: Utc::now(),
        });
    }

    /// Paged access log, oldest first.
    pub fn access_logs(
        &self,
        caller: &Caller,
        filter: AccessFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AccessLogEntry>, DaemonError> {
        require_admin(caller, "access_logs")?;
        Ok(self.audit.query(filter).skip(offset).take(limit).collect())
    }

    pub fn log_summary(&self, caller: &Caller, since: Option<DateTime<Utc>>) -> Result<AccessSummary, DaemonError> {
        require_admin(caller, "log_summary")?;
        Ok(self.audit.summarize(since))
    }

    /// The most recent `limit` lifecycle events, oldest first.
    pub fn lifecycle_events(
        &self,
        caller: &Caller,
        protocol: Option<ProtocolName>,
        limit: usize,
    ) -> Result<Vec<LifecycleEvent>, DaemonError> {
        require_admin(caller, "lifecycle_events")?;
        let events: Vec<LifecycleEvent> = self.audit.events(protocol).collect();
        let skip = events.len().saturating_sub(limit);
        Ok(events.into_iter().skip(skip).collect())
    }

    /// Ingest an access entry shipped by a daemon's log collector.
    pub fn record_access(&self, caller: &Caller, entry: AccessLogEntry) -> Result<(), DaemonError> {
        require_admin(caller, "record_access")?;
        registry::describe(entry.protocol.as_str())?;
        self.audit.record_access(&entry);
        Ok(())
    }

    pub fn tail_service_logs(&self, caller: &Caller, name: &str, lines: usize) -> Result<Vec<String>, DaemonError> {
        require_admin(caller, "tail_service_logs")?;
        let t = self.target(name)?;
        Ok(t.adapter.tail_logs(lines)?)
    }
}

fn all_warnings(outcome: SyncOutcome) -> Vec<String> {
    let mut warnings = outcome.warnings;
    warnings.extend(outcome.report.warnings);
    warnings
}

fn describe_probe(probed: &ProbedStatus) -> String {
    match probed {
        ProbedStatus::NotInstalled => "not installed".to_string(),
        ProbedStatus::Stopped => "stopped".to_string(),
        ProbedStatus::Running => "running".to_string(),
        ProbedStatus::Unhealthy { detail } => format!("unhealthy ({detail})"),
    }
}

/// Settings end up verbatim in native config files.
pub(crate) fn validate_settings(settings: &ProtocolSettings) -> Result<(), DaemonError> {
    if settings.port == Some(0) {
        return Err(DaemonError::InvalidSettings("port must be between 1 and 65535".into()));
    }
    if let Some((low, high)) = settings.passive_port_range {
        if low == 0 || low > high {
            return Err(DaemonError::InvalidSettings(format!(
                "passive port range {low}-{high} must be non-zero and ascending"
            )));
        }
    }
    if settings.force_tls && !settings.tls_enabled {
        return Err(DaemonError::InvalidSettings("force_tls requires tls_enabled".into()));
    }
    for (key, value) in &settings.extra {
        let key_ok = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '));
        if !key_ok {
            return Err(DaemonError::InvalidSettings(format!("invalid option name '{key}'")));
        }
        if value.contains(|c: char| c == '\n' || c == '\r') {
            return Err(DaemonError::InvalidSettings(format!(
                "option '{key}' must be a single line"
            )));
        }
    }
    Ok(())
}
