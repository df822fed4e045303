use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use rstest::rstest;
use sharehost_adapters::{
    AdapterError, ApplyReport, InstallOutcome, ProbedStatus, ProtocolAdapter, WriteResult,
};
use sharehost_core::registry::{self, ProtocolDescriptor};
use sharehost_core::store;
use sharehost_core::types::{
    DesiredConfig, PathId, PermissionLevel, ProtocolName, ProtocolRecord, ProtocolStatus,
    SharedPath, UserAccount, UserId, UserProtocolAccess,
};
use sharehost_renderer::RenderedFile;
use sharehost_sync::{apply_protocol, diff_protocol, translate, AccessModel, SyncError};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------------------------------------------------------------------
// Model fixtures
// ---------------------------------------------------------------------------

fn shared(id: &str, name: &str, protocols: &[&str]) -> SharedPath {
    SharedPath {
        id: PathId::from(id),
        name: name.into(),
        path: PathBuf::from("/srv/sharehost").join(id),
        description: None,
        protocols: protocols.iter().map(|p| ProtocolName::from(*p)).collect(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        deleted_at: None,
    }
}

fn account(name: &str, is_admin: bool) -> UserAccount {
    UserAccount {
        id: UserId::from(format!("u-{name}")),
        username: name.into(),
        is_admin,
        is_active: true,
    }
}

fn grant(user: &str, path: &str, level: PermissionLevel) -> UserProtocolAccess {
    UserProtocolAccess {
        user_id: UserId::from(format!("u-{user}")),
        path_id: PathId::from(path),
        permission: level,
        created_at: Utc::now(),
        revoked_at: None,
    }
}

/// Two shares exposed everywhere, an admin, and alice with different
/// levels on each share.
fn office() -> AccessModel {
    let all = ["ftp", "sftp", "smb", "s3"];
    AccessModel {
        paths: vec![shared("docs", "Docs", &all), shared("media", "Media", &all)],
        access: vec![
            grant("alice", "docs", PermissionLevel::Write),
            grant("alice", "media", PermissionLevel::Read),
            grant("bob", "media", PermissionLevel::Full),
        ],
        users: vec![account("root", true), account("alice", false), account("bob", false)],
    }
}

fn record(descriptor: &ProtocolDescriptor, status: ProtocolStatus) -> ProtocolRecord {
    let mut r = ProtocolRecord::new(descriptor.protocol_name());
    r.status = status;
    r
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

#[rstest]
#[case("ftp")]
#[case("sftp")]
#[case("smb")]
#[case("s3")]
fn admins_get_full_on_every_share(#[case] protocol: &str) {
    let desc = registry::describe(protocol).unwrap();
    let t = translate(desc, &record(desc, ProtocolStatus::Running), Path::new("/srv/sharehost"), &office());
    for share in &t.desired.shares {
        let root = share.grants.iter().find(|g| g.username == "root").unwrap();
        assert_eq!(root.level, PermissionLevel::Full);
        assert!(root.implicit_admin);
    }
}

#[test]
fn smb_downgrades_write_to_read_with_warning() {
    let desc = registry::describe("smb").unwrap();
    let t = translate(desc, &record(desc, ProtocolStatus::Running), Path::new("/srv/sharehost"), &office());

    let docs = t.desired.shares.iter().find(|s| s.name == "Docs").unwrap();
    let alice = docs.grants.iter().find(|g| g.username == "alice").unwrap();
    assert_eq!(alice.level, PermissionLevel::Read);
    assert_eq!(t.warnings.len(), 1);
    assert!(t.warnings[0].contains("alice"));
    assert!(t.warnings[0].contains("Docs"));
}

#[rstest]
#[case("ftp")]
#[case("sftp")]
fn per_user_root_keeps_first_path_by_name(#[case] protocol: &str) {
    let desc = registry::describe(protocol).unwrap();
    let storage = Path::new("/srv/sharehost");
    let t = translate(desc, &record(desc, ProtocolStatus::Stopped), storage, &office());

    let names: Vec<&str> = t.desired.user_roots.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob", "root"]);

    let alice = &t.desired.user_roots[0];
    assert_eq!(alice.root, PathBuf::from("/srv/sharehost/docs"));
    assert_eq!(alice.level, PermissionLevel::Write);
    let root = &t.desired.user_roots[2];
    assert_eq!(root.root, storage);
    assert!(root.is_admin);

    assert_eq!(t.warnings.len(), 1, "{:?}", t.warnings);
    assert!(t.warnings[0].contains("Media"));
}

#[test]
fn s3_policies_are_exact() {
    let desc = registry::describe("s3").unwrap();
    let t = translate(desc, &record(desc, ProtocolStatus::Running), Path::new("/srv/sharehost"), &office());
    assert!(t.warnings.is_empty());
    assert!(t.desired.user_roots.is_empty());
    let docs = t.desired.shares.iter().find(|s| s.name == "Docs").unwrap();
    let alice = docs.grants.iter().find(|g| g.username == "alice").unwrap();
    assert_eq!(alice.level, PermissionLevel::Write);
}

#[test]
fn invalid_usernames_are_skipped_with_warning() {
    let mut model = office();
    model.users.push(account("Bad Name", false));
    model.access.push(grant("Bad Name", "docs", PermissionLevel::Read));
    let desc = registry::describe("s3").unwrap();
    let t = translate(desc, &record(desc, ProtocolStatus::Running), Path::new("/srv"), &model);
    assert!(t
        .desired
        .shares
        .iter()
        .all(|s| s.grants.iter().all(|g| g.username != "Bad Name")));
    assert!(t.warnings.iter().any(|w| w.contains("Bad Name")));
}

#[test]
fn model_round_trips_through_the_store() {
    let tmp = TempDir::new().unwrap();
    let model = office();
    for p in &model.paths {
        store::save_shared_path_at(tmp.path(), p).unwrap();
    }
    for a in &model.access {
        store::save_access_at(tmp.path(), a).unwrap();
    }
    for u in &model.users {
        store::save_user_at(tmp.path(), u).unwrap();
    }

    let loaded = AccessModel::load_at(tmp.path()).unwrap();
    let desc = registry::describe("smb").unwrap();
    let rec = record(desc, ProtocolStatus::Running);
    assert_eq!(
        translate(desc, &rec, Path::new("/srv"), &loaded).desired,
        translate(desc, &rec, Path::new("/srv"), &model).desired
    );
}

// ---------------------------------------------------------------------------
// Applying through an adapter
// ---------------------------------------------------------------------------

/// Writes one file holding a debug rendering of the shares.
struct FileAdapter {
    descriptor: &'static ProtocolDescriptor,
    conf: PathBuf,
    reloads: AtomicUsize,
    reject_reload: AtomicBool,
    reject_config: AtomicBool,
}

impl FileAdapter {
    fn new(protocol: &str, dir: &Path) -> Self {
        Self {
            descriptor: registry::describe(protocol).unwrap(),
            conf: dir.join(format!("{protocol}.conf")),
            reloads: AtomicUsize::new(0),
            reject_reload: AtomicBool::new(false),
            reject_config: AtomicBool::new(false),
        }
    }

    fn content(desired: &DesiredConfig) -> String {
        desired
            .shares
            .iter()
            .map(|s| {
                let grants: Vec<String> = s
                    .grants
                    .iter()
                    .map(|g| format!("{}:{}", g.username, g.level.as_str()))
                    .collect();
                format!("{} {}\n", s.name, grants.join(","))
            })
            .collect()
    }
}

impl ProtocolAdapter for FileAdapter {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        self.descriptor
    }

    fn install(&self) -> Result<InstallOutcome, AdapterError> {
        Ok(InstallOutcome::default())
    }

    fn uninstall(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn configure(&self, desired: &DesiredConfig, dry_run: bool) -> Result<ApplyReport, AdapterError> {
        if self.reject_config.load(Ordering::SeqCst) {
            return Err(AdapterError::ConfigValidationFailed {
                path: self.conf.clone(),
                detail: "rejected".into(),
            });
        }
        let content = Self::content(desired);
        let existing = fs::read_to_string(&self.conf).ok();
        let mut report = ApplyReport::default();
        if existing.as_deref() == Some(content.as_str()) {
            report.writes.push(WriteResult::Unchanged {
                path: self.conf.clone(),
            });
            return Ok(report);
        }
        if dry_run {
            report.writes.push(WriteResult::WouldWrite {
                path: self.conf.clone(),
            });
            return Ok(report);
        }
        let backup = existing.map(|old| {
            let b = self.conf.with_extension("conf.sharehost.bak");
            fs::write(&b, old).unwrap();
            b
        });
        fs::write(&self.conf, content).unwrap();
        report.writes.push(WriteResult::Written {
            path: self.conf.clone(),
            backup,
        });
        Ok(report)
    }

    fn reload(&self) -> Result<(), AdapterError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.reject_reload.load(Ordering::SeqCst) {
            return Err(AdapterError::ServiceCommand {
                action: "reload",
                unit: self.descriptor.name.into(),
                detail: "daemon refused".into(),
            });
        }
        Ok(())
    }

    fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn probe_status(&self, _port: u16) -> Result<ProbedStatus, AdapterError> {
        Ok(ProbedStatus::Running)
    }

    fn installed_version(&self) -> Result<Option<String>, AdapterError> {
        Ok(None)
    }

    fn live_config_paths(&self) -> Vec<PathBuf> {
        vec![self.conf.clone()]
    }

    fn render(&self, desired: &DesiredConfig) -> Result<Vec<RenderedFile>, AdapterError> {
        Ok(vec![RenderedFile {
            path: self.conf.clone(),
            content: Self::content(desired),
        }])
    }

    fn tail_logs(&self, _lines: usize) -> Result<Vec<String>, AdapterError> {
        Ok(Vec::new())
    }
}

#[test]
fn running_protocol_reloads_only_when_config_changes() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let adapter = FileAdapter::new("smb", tmp.path());
    let rec = record(adapter.descriptor, ProtocolStatus::Running);

    let first = apply_protocol(&adapter, &rec, &office(), tmp.path(), false).unwrap();
    assert!(first.changed());
    assert!(first.reloaded);
    assert_eq!(first.warnings.len(), 1);

    let second = apply_protocol(&adapter, &rec, &office(), tmp.path(), false).unwrap();
    assert!(!second.changed());
    assert!(!second.reloaded);
    assert_eq!(adapter.reloads.load(Ordering::SeqCst), 1);
}

#[test]
fn stopped_protocol_is_configured_without_reload() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let adapter = FileAdapter::new("ftp", tmp.path());
    let rec = record(adapter.descriptor, ProtocolStatus::Stopped);

    let outcome = apply_protocol(&adapter, &rec, &office(), tmp.path(), false).unwrap();
    assert!(outcome.changed());
    assert!(!outcome.reloaded);
    assert_eq!(adapter.reloads.load(Ordering::SeqCst), 0);
}

#[test]
fn reload_failure_reports_rollback_candidates() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let adapter = FileAdapter::new("smb", tmp.path());
    let rec = record(adapter.descriptor, ProtocolStatus::Running);
    apply_protocol(&adapter, &rec, &office(), tmp.path(), false).unwrap();

    adapter.reject_reload.store(true, Ordering::SeqCst);
    let mut model = office();
    model.access.retain(|a| a.user_id != UserId::from("u-bob"));
    let err = apply_protocol(&adapter, &rec, &model, tmp.path(), false).unwrap_err();
    match err {
        SyncError::Reload {
            rollback_candidates,
            ..
        } => {
            assert_eq!(rollback_candidates, vec![tmp.path().join("smb.conf.sharehost.bak")]);
        }
        other => panic!("expected reload failure, got {other:?}"),
    }
}

#[test]
fn configure_failure_is_reported_as_configure() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let adapter = FileAdapter::new("smb", tmp.path());
    adapter.reject_config.store(true, Ordering::SeqCst);
    let rec = record(adapter.descriptor, ProtocolStatus::Running);

    let err = apply_protocol(&adapter, &rec, &office(), tmp.path(), false).unwrap_err();
    assert!(matches!(err, SyncError::Configure(_)));
    assert_eq!(err.kind(), "ConfigValidationFailed");
    assert_eq!(adapter.reloads.load(Ordering::SeqCst), 0);
}

#[test]
fn dry_run_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let adapter = FileAdapter::new("smb", tmp.path());
    let rec = record(adapter.descriptor, ProtocolStatus::Running);
    let outcome = apply_protocol(&adapter, &rec, &office(), tmp.path(), true).unwrap();
    assert!(!outcome.reloaded);
    assert!(!adapter.conf.exists());
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[test]
fn diff_is_empty_after_apply_and_shows_pending_changes() {
    let tmp = TempDir::new().unwrap();
    let adapter = FileAdapter::new("smb", tmp.path());
    let rec = record(adapter.descriptor, ProtocolStatus::Running);
    apply_protocol(&adapter, &rec, &office(), tmp.path(), false).unwrap();

    let clean = diff_protocol(&adapter, &rec, &office(), tmp.path()).unwrap();
    assert!(clean.diffs.is_empty());

    let mut model = office();
    model.paths.retain(|p| p.name != "Media");
    let pending = diff_protocol(&adapter, &rec, &model, tmp.path()).unwrap();
    assert_eq!(pending.diffs.len(), 1);
    let unified = &pending.diffs[0].unified_diff;
    assert!(unified.contains("@@"));
    assert!(unified.contains("-Media"));
    let on_disk = fs::read_to_string(&adapter.conf).unwrap();
    assert!(on_disk.contains("Media"), "diff must not write");
}
