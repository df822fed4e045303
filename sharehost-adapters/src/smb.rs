//! Samba adapter: `smb.conf` with one section per share, units `smbd` and
//! `nmbd`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sharehost_core::registry::ProtocolDescriptor;
use sharehost_core::types::DesiredConfig;
use sharehost_renderer::{NativeTarget, RenderedFile};

use crate::adapter::{
    lint_lines, AdapterContext, InstallOutcome, ProbedStatus, ProtocolAdapter, UnitDaemon,
};
use crate::error::AdapterError;
use crate::writer::ApplyReport;

pub struct SmbAdapter {
    daemon: UnitDaemon,
}

impl SmbAdapter {
    pub fn new(descriptor: &'static ProtocolDescriptor, ctx: Arc<AdapterContext>) -> Self {
        Self {
            daemon: UnitDaemon::new(descriptor, ctx),
        }
    }

    fn ctx(&self) -> &AdapterContext {
        &self.daemon.ctx
    }

    /// `testparm -s` on the staged file when Samba's tools are present,
    /// otherwise a structural lint.
    fn check(&self, staged: &Path, file: &RenderedFile) -> Result<(), AdapterError> {
        lint_smb_conf(staged, &file.content)?;
        let args = vec!["-s".to_string(), staged.display().to_string()];
        match self.ctx().runner.run("testparm", &args) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(AdapterError::ConfigValidationFailed {
                path: staged.to_path_buf(),
                detail: out.combined(),
            }),
            Err(AdapterError::Spawn { .. }) => {
                tracing::debug!("testparm not available; structural lint only");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Section headers are `[name]`; everything else is `key = value`.
pub fn lint_smb_conf(staged: &Path, content: &str) -> Result<(), AdapterError> {
    lint_lines(staged, content, |line| {
        if line.starts_with('[') {
            if !line.ends_with(']') || line.len() < 3 || line[1..line.len() - 1].contains(&['[', ']'][..]) {
                return Some("malformed section header".into());
            }
            return None;
        }
        match line.split_once('=') {
            Some((key, _)) if !key.trim().is_empty() => None,
            _ => Some("expected key = value".into()),
        }
    })?;
    if !content.lines().any(|l| l.trim() == "[global]") {
        return Err(AdapterError::ConfigValidationFailed {
            path: staged.to_path_buf(),
            detail: "missing [global] section".into(),
        });
    }
    Ok(())
}

impl ProtocolAdapter for SmbAdapter {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        self.daemon.descriptor
    }

    fn install(&self) -> Result<InstallOutcome, AdapterError> {
        self.daemon.install()
    }

    fn uninstall(&self) -> Result<(), AdapterError> {
        self.daemon.uninstall()
    }

    fn configure(&self, desired: &DesiredConfig, dry_run: bool) -> Result<ApplyReport, AdapterError> {
        let files = self.render(desired)?;
        self.ctx()
            .apply(self.daemon.descriptor.name, &files, dry_run, |staged, file| {
                self.check(staged, file)
            })
    }

    fn reload(&self) -> Result<(), AdapterError> {
        // smbd re-reads smb.conf on reload without dropping sessions.
        self.daemon.reload()
    }

    fn start(&self) -> Result<(), AdapterError> {
        self.daemon.start()
    }

    fn stop(&self) -> Result<(), AdapterError> {
        self.daemon.stop()
    }

    fn probe_status(&self, port: u16) -> Result<ProbedStatus, AdapterError> {
        self.daemon.probe(port)
    }

    fn installed_version(&self) -> Result<Option<String>, AdapterError> {
        self.daemon.installed_version()
    }

    fn live_config_paths(&self) -> Vec<PathBuf> {
        vec![self.ctx().settings.smb.conf.clone()]
    }

    fn render(&self, desired: &DesiredConfig) -> Result<Vec<RenderedFile>, AdapterError> {
        self.ctx().render(desired, NativeTarget::Samba)
    }

    fn tail_logs(&self, lines: usize) -> Result<Vec<String>, AdapterError> {
        self.daemon.tail_logs(lines)
    }
}
