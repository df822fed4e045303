//! The [`ProtocolAdapter`] seam and the shared plumbing behind it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use sharehost_core::registry::{AdapterKind, ProtocolDescriptor};
use sharehost_core::types::DesiredConfig;
use sharehost_core::Settings;
use sharehost_renderer::{NativeTarget, RenderedFile, Renderer};

use crate::error::AdapterError;
use crate::package::PackageInstaller;
use crate::probe::{HealthCheck, TcpHealthCheck};
use crate::runner::{CommandRunner, SystemRunner};
use crate::supervisor::{ServiceManager, Systemd};
use crate::writer::{self, ApplyReport};
use crate::{ftp, s3, sftp, smb, stub};

/// What the host says about a protocol, independent of the recorded status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProbedStatus {
    NotInstalled,
    Stopped,
    Running,
    /// Supervisor reports active but the port does not answer.
    Unhealthy { detail: String },
}

impl ProbedStatus {
    pub fn is_serving(&self) -> bool {
        matches!(self, ProbedStatus::Running)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub version: Option<String>,
    /// `false` when everything was already present.
    pub changed: bool,
}

/// Drives one external daemon: packages, native config, service lifecycle.
pub trait ProtocolAdapter: Send + Sync {
    fn descriptor(&self) -> &'static ProtocolDescriptor;

    /// Re-entrant: an already installed daemon short-circuits.
    /// Leaves the daemon installed but not running.
    fn install(&self) -> Result<InstallOutcome, AdapterError>;

    fn uninstall(&self) -> Result<(), AdapterError>;

    /// Render `desired`, stage, validate and atomically replace the live
    /// config. Unchanged content is not rewritten.
    fn configure(&self, desired: &DesiredConfig, dry_run: bool) -> Result<ApplyReport, AdapterError>;

    /// Make the running daemon pick up its current config.
    fn reload(&self) -> Result<(), AdapterError>;

    /// Start and confirm the daemon is active.
    fn start(&self) -> Result<(), AdapterError>;

    fn stop(&self) -> Result<(), AdapterError>;

    /// Supervisor state combined with a TCP health check on `port`.
    fn probe_status(&self, port: u16) -> Result<ProbedStatus, AdapterError>;

    fn installed_version(&self) -> Result<Option<String>, AdapterError>;

    /// Every live file `configure` may write.
    fn live_config_paths(&self) -> Vec<PathBuf>;

    /// Native files for `desired` without touching disk.
    fn render(&self, desired: &DesiredConfig) -> Result<Vec<RenderedFile>, AdapterError>;

    fn tail_logs(&self, lines: usize) -> Result<Vec<String>, AdapterError>;
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Host handles shared by every adapter.
pub struct AdapterContext {
    pub settings: Settings,
    pub state_dir: PathBuf,
    pub runner: Arc<dyn CommandRunner>,
    pub services: Arc<dyn ServiceManager>,
    pub packages: Arc<PackageInstaller>,
    pub health: Arc<dyn HealthCheck>,
    pub renderer: Arc<Renderer>,
}

impl AdapterContext {
    pub fn new(
        settings: Settings,
        state_dir: PathBuf,
        runner: Arc<dyn CommandRunner>,
        packages: PackageInstaller,
        health: Arc<dyn HealthCheck>,
    ) -> Result<Self, AdapterError> {
        let renderer = Renderer::new(&settings)?;
        let services = Arc::new(Systemd::new(runner.clone(), settings.supervisor.clone()));
        Ok(Self {
            settings,
            state_dir,
            runner,
            services,
            packages: Arc::new(packages),
            health,
            renderer: Arc::new(renderer),
        })
    }

    /// Real host: `std::process`, os-release detection, TCP probes.
    pub fn system(settings: Settings, state_dir: PathBuf) -> Result<Self, AdapterError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let packages = PackageInstaller::detect(runner.clone());
        let health = Arc::new(TcpHealthCheck::new(settings.health_timeout()));
        Self::new(settings, state_dir, runner, packages, health)
    }

    pub fn render(
        &self,
        desired: &DesiredConfig,
        target: NativeTarget,
    ) -> Result<Vec<RenderedFile>, AdapterError> {
        Ok(self.renderer.render(desired, target, &self.settings)?)
    }

    pub fn apply<F>(
        &self,
        protocol: &str,
        files: &[RenderedFile],
        dry_run: bool,
        check: F,
    ) -> Result<ApplyReport, AdapterError>
    where
        F: Fn(&Path, &RenderedFile) -> Result<(), AdapterError>,
    {
        writer::apply_at(&self.state_dir, protocol, files, dry_run, check)
    }
}

/// Adapter for `descriptor`, chosen by its [`AdapterKind`].
pub fn build_adapter(
    descriptor: &'static ProtocolDescriptor,
    ctx: Arc<AdapterContext>,
) -> Box<dyn ProtocolAdapter> {
    match descriptor.adapter {
        AdapterKind::Ftp => Box::new(ftp::FtpAdapter::new(descriptor, ctx)),
        AdapterKind::Sftp => Box::new(sftp::SftpAdapter::new(descriptor, ctx)),
        AdapterKind::Smb => Box::new(smb::SmbAdapter::new(descriptor, ctx)),
        AdapterKind::S3 => Box::new(s3::S3Adapter::new(descriptor, ctx)),
        AdapterKind::Stub => Box::new(stub::StubAdapter::new(descriptor)),
    }
}

// ---------------------------------------------------------------------------
// UnitDaemon
// ---------------------------------------------------------------------------

/// Lifecycle shared by daemons shipped as distribution packages with
/// service units.
pub(crate) struct UnitDaemon {
    pub(crate) descriptor: &'static ProtocolDescriptor,
    pub(crate) ctx: Arc<AdapterContext>,
}

impl UnitDaemon {
    pub(crate) fn new(descriptor: &'static ProtocolDescriptor, ctx: Arc<AdapterContext>) -> Self {
        Self { descriptor, ctx }
    }

    fn units(&self) -> &'static [&'static str] {
        self.descriptor.units
    }

    /// The unit whose state stands for the protocol's.
    pub(crate) fn primary_unit(&self) -> &'static str {
        self.units().first().copied().unwrap_or(self.descriptor.name)
    }

    /// Installs packages, then leaves the units stopped and disabled:
    /// distribution post-install scripts often start them.
    pub(crate) fn install(&self) -> Result<InstallOutcome, AdapterError> {
        let (version, changed) = self.ctx.packages.ensure_installed(self.descriptor.packages)?;
        if changed {
            for unit in self.units() {
                if let Err(e) = self.ctx.services.stop(unit) {
                    tracing::warn!(unit, error = %e, "could not stop unit after install");
                }
                if let Err(e) = self.ctx.services.disable(unit) {
                    tracing::warn!(unit, error = %e, "could not disable unit after install");
                }
            }
        }
        Ok(InstallOutcome { version, changed })
    }

    pub(crate) fn uninstall(&self) -> Result<(), AdapterError> {
        self.stop()?;
        self.ctx.packages.remove(self.descriptor.packages)?;
        crate::hash_store::clear_at(&self.ctx.state_dir, self.descriptor.name)
    }

    pub(crate) fn start(&self) -> Result<(), AdapterError> {
        for unit in self.units() {
            self.ctx.services.enable(unit)?;
            self.ctx.services.start(unit)?;
        }
        Ok(())
    }

    pub(crate) fn stop(&self) -> Result<(), AdapterError> {
        for unit in self.units().iter().rev() {
            self.ctx.services.stop(unit)?;
            self.ctx.services.disable(unit)?;
        }
        Ok(())
    }

    pub(crate) fn reload(&self) -> Result<(), AdapterError> {
        for unit in self.units() {
            self.ctx.services.reload(unit)?;
        }
        Ok(())
    }

    pub(crate) fn installed_version(&self) -> Result<Option<String>, AdapterError> {
        self.ctx.packages.installed_version(self.descriptor.packages)
    }

    pub(crate) fn probe(&self, port: u16) -> Result<ProbedStatus, AdapterError> {
        if self.installed_version()?.is_none() {
            return Ok(ProbedStatus::NotInstalled);
        }
        let unit = self.primary_unit();
        if !self.ctx.services.is_active(unit)? {
            return Ok(ProbedStatus::Stopped);
        }
        Ok(health_verdict(self.ctx.health.as_ref(), unit, port))
    }

    pub(crate) fn tail_logs(&self, lines: usize) -> Result<Vec<String>, AdapterError> {
        let mut out = Vec::new();
        for unit in self.units() {
            out.extend(self.ctx.services.tail_logs(unit, lines)?);
        }
        Ok(out)
    }
}

/// Active according to the supervisor; confirm with a connect.
pub(crate) fn health_verdict(health: &dyn HealthCheck, unit: &str, port: u16) -> ProbedStatus {
    if health.is_serving(port) {
        ProbedStatus::Running
    } else {
        ProbedStatus::Unhealthy {
            detail: format!("{unit} is active but nothing answers on port {port}"),
        }
    }
}

/// Line-oriented lint shared by the text formats: reports the first
/// offending line as a validation failure of `staged`.
pub(crate) fn lint_lines<F>(staged: &Path, content: &str, check_line: F) -> Result<(), AdapterError>
where
    F: Fn(&str) -> Option<String>,
{
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(problem) = check_line(line) {
            return Err(AdapterError::ConfigValidationFailed {
                path: staged.to_path_buf(),
                detail: format!("line {}: {problem}: {line}", idx + 1),
            });
        }
    }
    Ok(())
}
