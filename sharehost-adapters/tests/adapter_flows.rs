use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sharehost_adapters::{
    build_adapter, AdapterContext, AdapterError, CommandOutput, CommandRunner, HealthCheck,
    PackageInstaller, ProbedStatus, SpawnSpec,
};
use sharehost_core::config::SupervisorSettings;
use sharehost_core::registry;
use sharehost_core::types::{
    DesiredConfig, NativeGrant, PathId, PermissionLevel, ProtocolName, ProtocolSettings,
    ShareConfig, UserRoot,
};
use sharehost_core::Settings;
use sharehost_detector::PackageManager;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeRunner {
    answers: Mutex<HashMap<String, CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn answer(&self, prefix: &str, out: CommandOutput) {
        self.answers.lock().unwrap().insert(prefix.to_string(), out);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, AdapterError> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());
        let answers = self.answers.lock().unwrap();
        Ok(answers
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn spawn_background(&self, spec: &SpawnSpec) -> Result<u32, AdapterError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("spawn {}", spec.program.display()));
        Ok(777)
    }
}

struct AlwaysServing;

impl HealthCheck for AlwaysServing {
    fn is_serving(&self, _port: u16) -> bool {
        true
    }
}

struct Host {
    _tmp: TempDir,
    root: PathBuf,
    runner: Arc<FakeRunner>,
    ctx: Arc<AdapterContext>,
}

fn host() -> Host {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let etc = root.join("etc");
    let mut settings = Settings::default();
    settings.storage_root = root.join("srv");
    settings.ftp.conf = etc.join("vsftpd.conf");
    settings.ftp.userlist = etc.join("vsftpd.userlist");
    settings.ftp.user_conf_dir = etc.join("vsftpd").join("user_conf");
    settings.sftp.drop_in = etc.join("ssh").join("sshd_config.d").join("sharehost-sftp.conf");
    settings.smb.conf = etc.join("samba").join("smb.conf");
    settings.s3.policy_bundle = etc.join("minio").join("policies.json");
    settings.s3.binary = root.join("bin").join("minio");
    settings.s3.data_dir = root.join("minio-data");
    settings.s3.env_file = etc.join("minio").join("minio.env");
    settings.s3.pid_file = root.join("run").join("minio.pid");
    settings.s3.log_file = root.join("log").join("minio.log");
    settings.supervisor = SupervisorSettings {
        start_timeout_ms: 50,
        poll_interval_ms: 1,
    };

    let runner = Arc::new(FakeRunner::default());
    runner.answer("systemctl is-active", CommandOutput::ok("active\n"));
    runner.answer("dpkg-query", CommandOutput::ok("1.0"));
    let packages = PackageInstaller::new(runner.clone(), PackageManager::Apt);
    let ctx = AdapterContext::new(
        settings,
        root.join("state"),
        runner.clone(),
        packages,
        Arc::new(AlwaysServing),
    )
    .unwrap();
    Host {
        _tmp: tmp,
        root,
        runner,
        ctx: Arc::new(ctx),
    }
}

fn desired(protocol: &str, storage: &Path) -> DesiredConfig {
    DesiredConfig {
        protocol: ProtocolName::from(protocol),
        port: registry::describe(protocol).unwrap().default_port,
        settings: ProtocolSettings::default(),
        storage_root: storage.to_path_buf(),
        shares: vec![ShareConfig {
            id: PathId::from("p1"),
            name: "Docs".into(),
            path: storage.join("docs"),
            description: None,
            grants: vec![
                NativeGrant {
                    username: "alice".into(),
                    level: PermissionLevel::Read,
                    implicit_admin: false,
                },
                NativeGrant {
                    username: "root".into(),
                    level: PermissionLevel::Full,
                    implicit_admin: true,
                },
            ],
        }],
        user_roots: vec![
            UserRoot {
                username: "alice".into(),
                root: storage.join("docs"),
                level: PermissionLevel::Read,
                is_admin: false,
            },
            UserRoot {
                username: "root".into(),
                root: storage.to_path_buf(),
                level: PermissionLevel::Full,
                is_admin: true,
            },
        ],
    }
}

// ---------------------------------------------------------------------------
// SMB
// ---------------------------------------------------------------------------

#[test]
fn smb_configure_is_validated_and_hash_gated() {
    let h = host();
    let smb = build_adapter(registry::describe("smb").unwrap(), h.ctx.clone());
    let d = desired("smb", &h.root.join("srv"));

    let first = smb.configure(&d, false).unwrap();
    assert!(first.changed());
    assert!(h.runner.called("testparm -s"));
    let conf = fs::read_to_string(&h.ctx.settings.smb.conf).unwrap();
    assert!(conf.contains("[Docs]"));
    assert!(conf.contains("read list = alice"));

    let second = smb.configure(&d, false).unwrap();
    assert!(!second.changed());
}

#[test]
fn smb_rejected_config_keeps_previous_live_file() {
    let h = host();
    let smb = build_adapter(registry::describe("smb").unwrap(), h.ctx.clone());
    let storage = h.root.join("srv");
    let mut d = desired("smb", &storage);
    smb.configure(&d, false).unwrap();
    let before = fs::read_to_string(&h.ctx.settings.smb.conf).unwrap();

    h.runner.answer(
        "testparm",
        CommandOutput::failed(1, "Unknown parameter encountered: \"bogus\""),
    );
    d.shares[0].name = "Docs2".into();
    let err = smb.configure(&d, false).unwrap_err();
    assert_eq!(err.kind(), "ConfigValidationFailed");
    assert!(err.to_string().contains("Unknown parameter"));
    assert_eq!(fs::read_to_string(&h.ctx.settings.smb.conf).unwrap(), before);
}

#[test]
fn smb_probe_reports_running_when_active_and_serving() {
    let h = host();
    let smb = build_adapter(registry::describe("smb").unwrap(), h.ctx.clone());
    assert_eq!(smb.probe_status(445).unwrap(), ProbedStatus::Running);

    h.runner.answer(
        "systemctl is-active",
        CommandOutput::failed(3, "").with_stdout("inactive"),
    );
    assert_eq!(smb.probe_status(445).unwrap(), ProbedStatus::Stopped);
}

// ---------------------------------------------------------------------------
// FTP
// ---------------------------------------------------------------------------

#[test]
fn ftp_writes_per_user_files_and_prunes_revoked_users() {
    let h = host();
    let ftp = build_adapter(registry::describe("ftp").unwrap(), h.ctx.clone());
    let storage = h.root.join("srv");
    let mut d = desired("ftp", &storage);
    ftp.configure(&d, false).unwrap();

    let user_dir = &h.ctx.settings.ftp.user_conf_dir;
    let alice = fs::read_to_string(user_dir.join("alice")).unwrap();
    assert!(alice.contains("write_enable=NO"));
    assert!(user_dir.join("root").exists());
    let userlist = fs::read_to_string(&h.ctx.settings.ftp.userlist).unwrap();
    assert_eq!(userlist.lines().collect::<Vec<_>>(), vec!["alice", "root"]);

    d.user_roots.retain(|u| u.username != "alice");
    let report = ftp.configure(&d, false).unwrap();
    assert_eq!(report.pruned, vec![user_dir.join("alice")]);
    assert!(!user_dir.join("alice").exists());
    assert!(!ftp.live_config_paths().contains(&user_dir.join("alice")));
}

#[test]
fn ftp_install_stops_units_started_by_the_package() {
    let h = host();
    h.runner
        .answer("dpkg-query -W -f=${Version} vsftpd", CommandOutput::failed(1, "not installed"));
    let ftp = build_adapter(registry::describe("ftp").unwrap(), h.ctx.clone());
    // The query keeps failing, so the installer reports no version but
    // still ran the install.
    let outcome = ftp.install().unwrap();
    assert!(outcome.changed);
    assert!(h.runner.called("apt-get install -y vsftpd"));
    assert!(h.runner.called("systemctl stop vsftpd"));
    assert!(h.runner.called("systemctl disable vsftpd"));
}

// ---------------------------------------------------------------------------
// SFTP
// ---------------------------------------------------------------------------

#[test]
fn sftp_stop_parks_drop_in_without_stopping_sshd() {
    let h = host();
    let sftp = build_adapter(registry::describe("sftp").unwrap(), h.ctx.clone());
    let d = desired("sftp", &h.root.join("srv"));
    let live = h.ctx.settings.sftp.drop_in.clone();
    let parked = PathBuf::from(format!("{}.parked", live.display()));

    sftp.configure(&d, false).unwrap();
    assert!(parked.exists(), "configured while stopped lands parked");
    assert!(!live.exists());
    assert_eq!(sftp.probe_status(22).unwrap(), ProbedStatus::Stopped);

    sftp.start().unwrap();
    assert!(live.exists());
    assert!(!parked.exists());
    assert!(h.runner.called("sshd -t"));
    assert!(h.runner.called("systemctl reload-or-restart sshd"));
    assert_eq!(sftp.probe_status(22).unwrap(), ProbedStatus::Running);

    sftp.stop().unwrap();
    assert!(parked.exists());
    assert!(!live.exists());
    assert!(!h.runner.called("systemctl stop sshd"));
    assert!(!h.runner.called("apt-get remove"));
}

#[test]
fn sftp_start_rolls_back_when_sshd_rejects_config() {
    let h = host();
    let sftp = build_adapter(registry::describe("sftp").unwrap(), h.ctx.clone());
    sftp.configure(&desired("sftp", &h.root.join("srv")), false).unwrap();
    h.runner
        .answer("sshd -t", CommandOutput::failed(255, "Bad configuration option"));

    let err = sftp.start().unwrap_err();
    assert_eq!(err.kind(), "ConfigValidationFailed");
    assert!(!h.ctx.settings.sftp.drop_in.exists());
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// Root credentials on disk; with `pid` the server counts as running.
fn minio(h: &Host, pid: Option<u32>) -> String {
    let s3 = &h.ctx.settings.s3;
    fs::create_dir_all(s3.env_file.parent().unwrap()).unwrap();
    fs::write(&s3.env_file, "MINIO_ROOT_USER=root-user\nMINIO_ROOT_PASSWORD=secret\n").unwrap();
    if let Some(pid) = pid {
        fs::create_dir_all(s3.pid_file.parent().unwrap()).unwrap();
        fs::write(&s3.pid_file, format!("{pid}\n")).unwrap();
    }
    s3.binary.with_file_name("mc").display().to_string()
}

#[test]
fn s3_revoke_detaches_and_removes_the_policy() {
    let h = host();
    let mc = minio(&h, Some(555));
    let s3 = build_adapter(registry::describe("s3").unwrap(), h.ctx.clone());
    let mut d = desired("s3", &h.root.join("srv"));

    s3.configure(&d, false).unwrap();
    assert!(h.runner.called(&format!("{mc} admin policy create sharehost sharehost-alice")));
    assert!(h.runner.called(&format!("{mc} admin policy attach sharehost sharehost-alice --user alice")));
    assert!(!h.runner.called(&format!("{mc} admin policy detach")));

    d.shares[0].grants.retain(|g| g.username != "alice");
    s3.configure(&d, false).unwrap();
    assert!(h.runner.called(&format!("{mc} admin policy detach sharehost sharehost-alice --user alice")));
    assert!(h.runner.called(&format!("{mc} admin policy rm sharehost sharehost-alice")));
    assert!(!h.runner.called(&format!("{mc} admin policy rm sharehost sharehost-root")));
    let live = fs::read_to_string(&h.ctx.settings.s3.policy_bundle).unwrap();
    assert!(!live.contains("sharehost-alice"));
}

#[test]
fn s3_rejected_bundle_keeps_previous_live_file() {
    let h = host();
    let mc = minio(&h, Some(555));
    let s3 = build_adapter(registry::describe("s3").unwrap(), h.ctx.clone());
    let mut d = desired("s3", &h.root.join("srv"));
    s3.configure(&d, false).unwrap();
    let before = fs::read_to_string(&h.ctx.settings.s3.policy_bundle).unwrap();

    h.runner.answer(
        &format!("{mc} admin policy create"),
        CommandOutput::failed(1, "mc: <ERROR> Unable to create new policy"),
    );
    d.shares[0].grants.retain(|g| g.username != "alice");
    assert!(s3.configure(&d, false).is_err());
    assert_eq!(fs::read_to_string(&h.ctx.settings.s3.policy_bundle).unwrap(), before);
    assert!(!h.runner.called(&format!("{mc} admin policy detach")));
}

#[test]
fn s3_start_stops_minio_when_the_bundle_is_rejected() {
    let h = host();
    let mc = minio(&h, None);
    let s3 = build_adapter(registry::describe("s3").unwrap(), h.ctx.clone());
    // Stopped: the bundle is written without reaching the server.
    s3.configure(&desired("s3", &h.root.join("srv")), false).unwrap();
    assert!(!h.runner.called(&mc));

    h.runner.answer(
        &format!("{mc} mb"),
        CommandOutput::failed(1, "mc: <ERROR> Unable to make bucket"),
    );
    assert!(s3.start().is_err());
    assert!(h.runner.called("spawn"));
    assert!(h.runner.called("kill -TERM 777"));
    assert!(!h.ctx.settings.s3.pid_file.exists());
}

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

#[test]
fn stub_protocols_report_not_implemented() {
    let h = host();
    let nfs = build_adapter(registry::describe("nfs").unwrap(), h.ctx.clone());
    assert_eq!(nfs.install().unwrap_err().kind(), "NotImplemented");
    assert_eq!(
        nfs.configure(&desired("ftp", &h.root), false).unwrap_err().kind(),
        "NotImplemented"
    );
    assert_eq!(nfs.probe_status(2049).unwrap(), ProbedStatus::NotInstalled);
    assert!(h.runner.calls().is_empty());
}
