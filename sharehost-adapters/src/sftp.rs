//! SFTP over the host's sshd.
//!
//! sshd also carries administrative SSH, so this adapter never stops,
//! disables or removes it. "Running" means the sharehost drop-in is in
//! `sshd_config.d`; stopping parks it as `<drop_in>.parked`, which the
//! `*.conf` include glob does not match.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sharehost_core::registry::ProtocolDescriptor;
use sharehost_core::types::DesiredConfig;
use sharehost_renderer::{NativeTarget, RenderedFile};

use crate::adapter::{health_verdict, AdapterContext, InstallOutcome, ProbedStatus, ProtocolAdapter};
use crate::error::{io_err, AdapterError};
use crate::hash_store;
use crate::writer::ApplyReport;

pub struct SftpAdapter {
    descriptor: &'static ProtocolDescriptor,
    ctx: Arc<AdapterContext>,
}

impl SftpAdapter {
    pub fn new(descriptor: &'static ProtocolDescriptor, ctx: Arc<AdapterContext>) -> Self {
        Self { descriptor, ctx }
    }

    fn unit(&self) -> &'static str {
        self.descriptor.units.first().copied().unwrap_or("sshd")
    }

    fn live_path(&self) -> &Path {
        &self.ctx.settings.sftp.drop_in
    }

    pub fn parked_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.parked", self.live_path().display()))
    }

    fn enabled(&self) -> bool {
        self.live_path().exists()
    }

    /// Where `configure` writes: the live drop-in while enabled, else the
    /// parked copy.
    fn target_path(&self) -> PathBuf {
        if self.enabled() {
            self.live_path().to_path_buf()
        } else {
            self.parked_path()
        }
    }

    fn move_file(from: &Path, to: &Path) -> Result<(), AdapterError> {
        if let Some(dir) = to.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        fs::rename(from, to).map_err(|e| io_err(from, e))
    }

    /// `sshd -t` over the full configuration, drop-in included. Skipped when
    /// the binary cannot be run.
    fn test_sshd_config(&self) -> Result<(), AdapterError> {
        match self.ctx.runner.run("sshd", &["-t".to_string()]) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(AdapterError::ConfigValidationFailed {
                path: self.live_path().to_path_buf(),
                detail: out.combined(),
            }),
            Err(AdapterError::Spawn { .. }) => {
                tracing::debug!("sshd binary not runnable; skipping sshd -t");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Every `Match` block must chroot to an absolute path and force
/// `internal-sftp`.
pub fn lint_drop_in(staged: &Path, content: &str) -> Result<(), AdapterError> {
    struct Block {
        line: usize,
        header: String,
        chroot: bool,
        forced: bool,
    }

    let fail = |detail: String| AdapterError::ConfigValidationFailed {
        path: staged.to_path_buf(),
        detail,
    };
    let finish = |block: &Block| -> Result<(), AdapterError> {
        if !block.chroot {
            return Err(fail(format!(
                "line {}: {} has no absolute ChrootDirectory",
                block.line, block.header
            )));
        }
        if !block.forced {
            return Err(fail(format!(
                "line {}: {} does not force internal-sftp",
                block.line, block.header
            )));
        }
        Ok(())
    };

    let mut current: Option<Block> = None;
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        match keyword.to_ascii_lowercase().as_str() {
            "match" => {
                if let Some(block) = current.take() {
                    finish(&block)?;
                }
                current = Some(Block {
                    line: idx + 1,
                    header: line.to_string(),
                    chroot: false,
                    forced: false,
                });
            }
            _ => {
                let Some(block) = current.as_mut() else {
                    return Err(fail(format!("line {}: directive outside a Match block: {line}", idx + 1)));
                };
                match keyword.to_ascii_lowercase().as_str() {
                    "chrootdirectory" => block.chroot = rest.starts_with('/'),
                    "forcecommand" => block.forced = rest.starts_with("internal-sftp"),
                    "allowtcpforwarding" | "x11forwarding" | "permittunnel" | "allowagentforwarding" => {}
                    _ => {
                        return Err(fail(format!("line {}: unexpected directive: {line}", idx + 1)));
                    }
                }
            }
        }
    }
    if let Some(block) = current {
        finish(&block)?;
    }
    Ok(())
}

impl ProtocolAdapter for SftpAdapter {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        self.descriptor
    }

    fn install(&self) -> Result<InstallOutcome, AdapterError> {
        let (version, changed) = self.ctx.packages.ensure_installed(self.descriptor.packages)?;
        Ok(InstallOutcome { version, changed })
    }

    fn uninstall(&self) -> Result<(), AdapterError> {
        let was_enabled = self.enabled();
        for path in [self.live_path().to_path_buf(), self.parked_path()] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "removed sftp drop-in"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(path, e)),
            }
        }
        if was_enabled && self.ctx.services.is_active(self.unit())? {
            self.ctx.services.reload(self.unit())?;
        }
        hash_store::clear_at(&self.ctx.state_dir, self.descriptor.name)
    }

    fn configure(&self, desired: &DesiredConfig, dry_run: bool) -> Result<ApplyReport, AdapterError> {
        let files = self.render(desired)?;
        self.ctx
            .apply(self.descriptor.name, &files, dry_run, |staged, file| {
                lint_drop_in(staged, &file.content)
            })
    }

    fn reload(&self) -> Result<(), AdapterError> {
        if !self.enabled() {
            return Ok(());
        }
        self.test_sshd_config()?;
        self.ctx.services.reload(self.unit())
    }

    fn start(&self) -> Result<(), AdapterError> {
        if !self.ctx.services.is_active(self.unit())? {
            self.ctx.services.enable(self.unit())?;
            self.ctx.services.start(self.unit())?;
        }
        let parked = self.parked_path();
        if parked.exists() {
            Self::move_file(&parked, self.live_path())?;
        } else if !self.enabled() {
            // Never configured: an empty drop-in still marks sftp as enabled.
            fs::write(self.live_path(), "").map_err(|e| io_err(self.live_path(), e))?;
        }
        if let Err(e) = self.test_sshd_config() {
            Self::move_file(self.live_path(), &parked)?;
            return Err(e);
        }
        self.ctx.services.reload(self.unit())?;
        tracing::info!(drop_in = %self.live_path().display(), "sftp drop-in enabled");
        Ok(())
    }

    fn stop(&self) -> Result<(), AdapterError> {
        if !self.enabled() {
            return Ok(());
        }
        Self::move_file(self.live_path(), &self.parked_path())?;
        if self.ctx.services.is_active(self.unit())? {
            self.ctx.services.reload(self.unit())?;
        }
        tracing::info!(parked = %self.parked_path().display(), "sftp drop-in parked");
        Ok(())
    }

    fn probe_status(&self, port: u16) -> Result<ProbedStatus, AdapterError> {
        if self.installed_version()?.is_none() {
            return Ok(ProbedStatus::NotInstalled);
        }
        if !self.enabled() {
            return Ok(ProbedStatus::Stopped);
        }
        if !self.ctx.services.is_active(self.unit())? {
            return Ok(ProbedStatus::Unhealthy {
                detail: format!("drop-in enabled but {} is not active", self.unit()),
            });
        }
        Ok(health_verdict(self.ctx.health.as_ref(), self.unit(), port))
    }

    fn installed_version(&self) -> Result<Option<String>, AdapterError> {
        self.ctx.packages.installed_version(self.descriptor.packages)
    }

    fn live_config_paths(&self) -> Vec<PathBuf> {
        vec![self.target_path()]
    }

    fn render(&self, desired: &DesiredConfig) -> Result<Vec<RenderedFile>, AdapterError> {
        let target = self.target_path();
        Ok(self
            .ctx
            .render(desired, NativeTarget::SftpDropIn)?
            .into_iter()
            .map(|f| RenderedFile {
                path: target.clone(),
                content: f.content,
            })
            .collect())
    }

    fn tail_logs(&self, lines: usize) -> Result<Vec<String>, AdapterError> {
        Ok(self
            .ctx
            .services
            .tail_logs(self.unit(), lines)?
            .into_iter()
            .filter(|l| l.contains("sftp") || l.contains("Accepted") || l.contains("Failed"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lint(content: &str) -> Result<(), AdapterError> {
        lint_drop_in(Path::new("/tmp/x.conf"), content)
    }

    #[test]
    fn well_formed_blocks_pass() {
        lint("# header\n\nMatch User alice\n    ChrootDirectory /srv/a\n    ForceCommand internal-sftp -R\n    AllowTcpForwarding no\n    X11Forwarding no\n")
            .unwrap();
        lint("# only a header\n").unwrap();
    }

    #[test]
    fn relative_chroot_is_rejected() {
        let err = lint("Match User bob\n    ChrootDirectory srv/b\n    ForceCommand internal-sftp\n").unwrap_err();
        assert!(err.to_string().contains("ChrootDirectory"));
    }

    #[test]
    fn shell_access_is_rejected() {
        let err = lint("Match User bob\n    ChrootDirectory /srv/b\n    ForceCommand /bin/bash\n").unwrap_err();
        assert!(err.to_string().contains("internal-sftp"));
    }

    #[test]
    fn global_directives_are_rejected() {
        let err = lint("PasswordAuthentication yes\n").unwrap_err();
        assert_eq!(err.kind(), "ConfigValidationFailed");
    }
}
