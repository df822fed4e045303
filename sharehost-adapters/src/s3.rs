//! MinIO adapter.
//!
//! MinIO ships as a single binary, supervised here through a pid file rather
//! than a service unit. Access control lives inside the server: the rendered
//! policy bundle (buckets plus one policy per user) is pushed through `mc`
//! before it replaces the live bundle file.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sharehost_core::registry::ProtocolDescriptor;
use sharehost_core::store;
use sharehost_core::types::{DesiredConfig, ProtocolName};
use sharehost_renderer::{NativeTarget, RenderedFile};

use crate::adapter::{health_verdict, AdapterContext, InstallOutcome, ProbedStatus, ProtocolAdapter};
use crate::error::{io_err, AdapterError};
use crate::hash_store;
use crate::process::{read_env_file, ProcessSpec, ProcessSupervisor};
use crate::supervisor::ServiceManager;
use crate::writer::ApplyReport;

const SERVER_URL: &str = "https://dl.min.io/server/minio/release";
const CLIENT_URL: &str = "https://dl.min.io/client/mc/release";
const UNIT: &str = "minio";

/// Shape of the rendered policy bundle.
#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub buckets: Vec<String>,
    pub policies: Vec<PolicyEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub name: String,
    pub user: String,
    pub document: serde_json::Value,
}

pub struct S3Adapter {
    descriptor: &'static ProtocolDescriptor,
    ctx: Arc<AdapterContext>,
}

impl S3Adapter {
    pub fn new(descriptor: &'static ProtocolDescriptor, ctx: Arc<AdapterContext>) -> Self {
        Self { descriptor, ctx }
    }

    fn mc(&self) -> PathBuf {
        self.ctx.settings.s3.binary.with_file_name("mc")
    }

    /// Port from the persisted protocol record, else the catalog default.
    fn port(&self) -> u16 {
        store::load_protocol_at(&self.ctx.state_dir, &ProtocolName::from(self.descriptor.name))
            .ok()
            .and_then(|r| r.settings.port)
            .unwrap_or(self.descriptor.default_port)
    }

    fn process(&self) -> ProcessSupervisor {
        let s3 = &self.ctx.settings.s3;
        let port = self.port();
        ProcessSupervisor::new(
            ProcessSpec {
                program: s3.binary.clone(),
                args: vec![
                    "server".into(),
                    s3.data_dir.display().to_string(),
                    "--address".into(),
                    format!(":{port}"),
                    "--console-address".into(),
                    format!(":{}", s3.console_port),
                ],
                env_file: Some(s3.env_file.clone()),
                pid_file: s3.pid_file.clone(),
                log_file: s3.log_file.clone(),
                ready_port: port,
            },
            self.ctx.runner.clone(),
            self.ctx.health.clone(),
            self.ctx.settings.supervisor.clone(),
        )
    }

    fn arch(&self) -> Result<&'static str, AdapterError> {
        let out = self.ctx.runner.run("uname", &["-m".to_string()])?;
        match out.stdout.trim() {
            "x86_64" | "amd64" => Ok("amd64"),
            "aarch64" | "arm64" => Ok("arm64"),
            "ppc64le" => Ok("ppc64le"),
            other => Err(AdapterError::UnsupportedDistribution(format!(
                "no MinIO build for architecture '{other}'"
            ))),
        }
    }

    fn download(&self, url: &str, dest: &Path) -> Result<(), AdapterError> {
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let args = vec![
            "-fsSL".to_string(),
            "-o".to_string(),
            dest.display().to_string(),
            url.to_string(),
        ];
        let out = self.ctx.runner.run("curl", &args)?;
        if !out.success() {
            return Err(AdapterError::PackageManager {
                program: "curl".into(),
                output: out.combined(),
            });
        }
        make_executable(dest)
    }

    /// Root credentials are generated once and kept across reinstalls.
    fn ensure_env_file(&self) -> Result<(), AdapterError> {
        let s3 = &self.ctx.settings.s3;
        if s3.env_file.exists() {
            return Ok(());
        }
        let user = format!("sharehost-{}", &uuid::Uuid::new_v4().simple().to_string()[..10]);
        let password = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let content = format!(
            "MINIO_ROOT_USER={user}\nMINIO_ROOT_PASSWORD={password}\nMINIO_VOLUMES={}\n",
            s3.data_dir.display()
        );
        write_private(&s3.env_file, &content)?;
        tracing::info!(env_file = %s3.env_file.display(), "generated MinIO root credentials");
        Ok(())
    }

    fn root_credentials(&self) -> Result<(String, String), AdapterError> {
        let env = read_env_file(&self.ctx.settings.s3.env_file)?;
        let find = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        match (find("MINIO_ROOT_USER"), find("MINIO_ROOT_PASSWORD")) {
            (Some(user), Some(password)) => Ok((user, password)),
            _ => Err(AdapterError::ConfigApplyFailed {
                detail: format!(
                    "{} lacks MINIO_ROOT_USER/MINIO_ROOT_PASSWORD",
                    self.ctx.settings.s3.env_file.display()
                ),
            }),
        }
    }

    fn run_mc(&self, args: Vec<String>) -> Result<(), AdapterError> {
        let mc = self.mc();
        let out = self.ctx.runner.run(&mc.display().to_string(), &args)?;
        if out.success() {
            return Ok(());
        }
        Err(AdapterError::ConfigApplyFailed {
            detail: format!("mc {}: {}", args.first().map(String::as_str).unwrap_or(""), out.combined()),
        })
    }

    fn policy_dir(&self) -> PathBuf {
        self.ctx.state_dir.join("s3-policies")
    }

    /// Copy of the last bundle MinIO accepted.
    fn applied_record(&self) -> PathBuf {
        self.policy_dir().join("applied.json")
    }

    /// What the server currently holds: the last pushed bundle, else the
    /// live bundle file from before the first push.
    fn previous_bundle(&self) -> Result<Option<PolicyBundle>, AdapterError> {
        let record = self.applied_record();
        let path = if record.exists() {
            record
        } else {
            self.ctx.settings.s3.policy_bundle.clone()
        };
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Push `bundle` into the running server, then detach and delete the
    /// policies of users it no longer names. Bucket or policy failures abort;
    /// attach and detach failures (user unknown to MinIO) become warnings.
    pub fn apply_bundle(&self, bundle: &PolicyBundle) -> Result<Vec<String>, AdapterError> {
        let previous = self.previous_bundle()?;
        let alias = self.ctx.settings.s3.mc_alias.clone();
        let (user, password) = self.root_credentials()?;
        self.run_mc(vec![
            "alias".into(),
            "set".into(),
            alias.clone(),
            format!("http://127.0.0.1:{}", self.port()),
            user,
            password,
        ])?;

        for bucket in &bundle.buckets {
            self.run_mc(vec![
                "mb".into(),
                "--ignore-existing".into(),
                format!("{alias}/{bucket}"),
            ])?;
        }

        let policy_dir = self.policy_dir();
        fs::create_dir_all(&policy_dir).map_err(|e| io_err(&policy_dir, e))?;
        let mut warnings = Vec::new();
        for policy in &bundle.policies {
            let file = policy_dir.join(format!("{}.json", policy.name));
            write_private(&file, &serde_json::to_string_pretty(&policy.document)?)?;
            self.run_mc(vec![
                "admin".into(),
                "policy".into(),
                "create".into(),
                alias.clone(),
                policy.name.clone(),
                file.display().to_string(),
            ])?;
            if let Err(e) = self.run_mc(vec![
                "admin".into(),
                "policy".into(),
                "attach".into(),
                alias.clone(),
                policy.name.clone(),
                "--user".into(),
                policy.user.clone(),
            ]) {
                tracing::warn!(user = %policy.user, policy = %policy.name, error = %e, "policy attach failed");
                warnings.push(format!("policy {} not attached to {}: {e}", policy.name, policy.user));
            }
        }

        for stale in stale_policies(previous.as_ref(), bundle) {
            if let Err(e) = self.run_mc(vec![
                "admin".into(),
                "policy".into(),
                "detach".into(),
                alias.clone(),
                stale.name.clone(),
                "--user".into(),
                stale.user.clone(),
            ]) {
                tracing::warn!(user = %stale.user, policy = %stale.name, error = %e, "policy detach failed");
                warnings.push(format!("policy {} not detached from {}: {e}", stale.name, stale.user));
            }
            // MinIO refuses to delete a policy that is still attached.
            self.run_mc(vec![
                "admin".into(),
                "policy".into(),
                "rm".into(),
                alias.clone(),
                stale.name.clone(),
            ])?;
            let file = policy_dir.join(format!("{}.json", stale.name));
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(file, e)),
            }
            tracing::info!(user = %stale.user, policy = %stale.name, "policy removed");
        }

        write_private(&self.applied_record(), &serde_json::to_string_pretty(bundle)?)?;
        Ok(warnings)
    }

    fn apply_live_bundle(&self) -> Result<Vec<String>, AdapterError> {
        let path = &self.ctx.settings.s3.policy_bundle;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let bundle: PolicyBundle = serde_json::from_str(&content)?;
        self.apply_bundle(&bundle)
    }
}

/// Policies in `previous` that `next` no longer carries.
pub fn stale_policies<'a>(previous: Option<&'a PolicyBundle>, next: &PolicyBundle) -> Vec<&'a PolicyEntry> {
    previous
        .map(|prev| {
            prev.policies
                .iter()
                .filter(|old| !next.policies.iter().any(|p| p.name == old.name))
                .collect()
        })
        .unwrap_or_default()
}

/// The bundle must be JSON of the expected shape.
pub fn parse_bundle(staged: &Path, content: &str) -> Result<PolicyBundle, AdapterError> {
    serde_json::from_str(content).map_err(|e| AdapterError::ConfigValidationFailed {
        path: staged.to_path_buf(),
        detail: e.to_string(),
    })
}

fn make_executable(path: &Path) -> Result<(), AdapterError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| io_err(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn write_private(path: &Path, content: &str) -> Result<(), AdapterError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    fs::write(path, content).map_err(|e| io_err(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

impl ProtocolAdapter for S3Adapter {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        self.descriptor
    }

    fn install(&self) -> Result<InstallOutcome, AdapterError> {
        let s3 = &self.ctx.settings.s3;
        let mut changed = false;
        if !s3.binary.exists() || !self.mc().exists() {
            let arch = self.arch()?;
            if !s3.binary.exists() {
                self.download(&format!("{SERVER_URL}/linux-{arch}/minio"), &s3.binary)?;
            }
            if !self.mc().exists() {
                self.download(&format!("{CLIENT_URL}/linux-{arch}/mc"), &self.mc())?;
            }
            changed = true;
        }
        fs::create_dir_all(&s3.data_dir).map_err(|e| io_err(&s3.data_dir, e))?;
        self.ensure_env_file()?;
        let version = self.installed_version()?;
        tracing::info!(changed, version = ?version, "MinIO installed");
        Ok(InstallOutcome { version, changed })
    }

    /// Keeps the data directory and root credentials; removes binaries and
    /// the policy bundle.
    fn uninstall(&self) -> Result<(), AdapterError> {
        self.process().stop(UNIT)?;
        let s3 = &self.ctx.settings.s3;
        for path in [s3.binary.clone(), self.mc(), s3.policy_bundle.clone()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(path, e)),
            }
        }
        hash_store::clear_at(&self.ctx.state_dir, self.descriptor.name)
    }

    fn configure(&self, desired: &DesiredConfig, dry_run: bool) -> Result<ApplyReport, AdapterError> {
        let files = self.render(desired)?;
        let live = !dry_run && self.process().is_active(UNIT)?;
        let warnings = RefCell::new(Vec::new());
        let mut report = self
            .ctx
            .apply(self.descriptor.name, &files, dry_run, |staged, file| {
                let bundle = parse_bundle(staged, &file.content)?;
                if live {
                    warnings.borrow_mut().extend(self.apply_bundle(&bundle)?);
                }
                Ok(())
            })?;
        report.warnings.extend(warnings.into_inner());
        Ok(report)
    }

    fn reload(&self) -> Result<(), AdapterError> {
        if self.process().is_active(UNIT)? {
            self.apply_live_bundle()?;
        }
        Ok(())
    }

    fn start(&self) -> Result<(), AdapterError> {
        let process = self.process();
        process.start(UNIT)?;
        if let Err(e) = self.apply_live_bundle() {
            tracing::warn!(error = %e, "policy bundle rejected after start; stopping MinIO");
            process.stop(UNIT)?;
            return Err(e);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), AdapterError> {
        self.process().stop(UNIT)
    }

    fn probe_status(&self, port: u16) -> Result<ProbedStatus, AdapterError> {
        if !self.ctx.settings.s3.binary.exists() {
            return Ok(ProbedStatus::NotInstalled);
        }
        if !self.process().is_active(UNIT)? {
            return Ok(ProbedStatus::Stopped);
        }
        Ok(health_verdict(self.ctx.health.as_ref(), UNIT, port))
    }

    fn installed_version(&self) -> Result<Option<String>, AdapterError> {
        let binary = &self.ctx.settings.s3.binary;
        if !binary.exists() {
            return Ok(None);
        }
        let out = self
            .ctx
            .runner
            .run(&binary.display().to_string(), &["--version".to_string()])?;
        // "minio version RELEASE.2024-05-10T01-41-38Z (commit-id=...)"
        let version = out
            .stdout
            .lines()
            .next()
            .and_then(|l| l.split_whitespace().nth(2))
            .unwrap_or("unknown")
            .to_string();
        Ok(Some(version))
    }

    fn live_config_paths(&self) -> Vec<PathBuf> {
        vec![self.ctx.settings.s3.policy_bundle.clone()]
    }

    fn render(&self, desired: &DesiredConfig) -> Result<Vec<RenderedFile>, AdapterError> {
        self.ctx.render(desired, NativeTarget::MinioPolicies)
    }

    fn tail_logs(&self, lines: usize) -> Result<Vec<String>, AdapterError> {
        self.process().tail_logs(UNIT, lines)
    }
}
