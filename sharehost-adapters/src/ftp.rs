//! vsftpd adapter.
//!
//! Live files: `vsftpd.conf`, the allow-list (`userlist_deny=NO`) and one
//! file per user under `user_config_dir` carrying `local_root`,
//! `write_enable` and `cmds_denied`. Per-user files of users no longer
//! granted anything are pruned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sharehost_core::registry::ProtocolDescriptor;
use sharehost_core::types::{is_valid_username, DesiredConfig};
use sharehost_renderer::{NativeTarget, RenderedFile};

use crate::adapter::{
    lint_lines, AdapterContext, InstallOutcome, ProbedStatus, ProtocolAdapter, UnitDaemon,
};
use crate::error::AdapterError;
use crate::hash_store;
use crate::writer::{self, ApplyReport};

pub struct FtpAdapter {
    daemon: UnitDaemon,
}

impl FtpAdapter {
    pub fn new(descriptor: &'static ProtocolDescriptor, ctx: Arc<AdapterContext>) -> Self {
        Self {
            daemon: UnitDaemon::new(descriptor, ctx),
        }
    }

    fn ctx(&self) -> &AdapterContext {
        &self.daemon.ctx
    }

    fn check(&self, staged: &Path, file: &RenderedFile) -> Result<(), AdapterError> {
        if file.path == self.ctx().settings.ftp.userlist {
            lint_lines(staged, &file.content, |line| {
                (!is_valid_username(line)).then(|| "not a valid user name".to_string())
            })
        } else {
            lint_lines(staged, &file.content, lint_directive)
        }
    }
}

/// vsftpd accepts only `key=value` with no whitespace around `=`.
fn lint_directive(line: &str) -> Option<String> {
    let Some((key, value)) = line.split_once('=') else {
        return Some("expected key=value".into());
    };
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Some("invalid option name".into());
    }
    if key.ends_with(' ') || value.starts_with(' ') {
        return Some("whitespace around '='".into());
    }
    if value.is_empty() {
        return Some("empty value".into());
    }
    None
}

impl ProtocolAdapter for FtpAdapter {
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
        let mut report =
            self.ctx()
                .apply(self.daemon.descriptor.name, &files, dry_run, |staged, file| {
                    self.check(staged, file)
                })?;
        if !dry_run {
            let keep: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
            report.pruned = writer::prune_at(
                &self.ctx().state_dir,
                self.daemon.descriptor.name,
                &self.ctx().settings.ftp.user_conf_dir,
                &keep,
            )?;
        }
        Ok(report)
    }

    fn reload(&self) -> Result<(), AdapterError> {
        // vsftpd reads per-user files at login; the main file needs a restart.
        self.ctx().services.restart(self.daemon.primary_unit())
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
        let ftp = &self.ctx().settings.ftp;
        let mut paths = vec![ftp.conf.clone(), ftp.userlist.clone()];
        if let Ok(store) = hash_store::load_at(&self.ctx().state_dir, self.daemon.descriptor.name) {
            paths.extend(
                store
                    .files
                    .keys()
                    .map(PathBuf::from)
                    .filter(|p| p.starts_with(&ftp.user_conf_dir)),
            );
        }
        paths
    }

    fn render(&self, desired: &DesiredConfig) -> Result<Vec<RenderedFile>, AdapterError> {
        self.ctx().render(desired, NativeTarget::Vsftpd)
    }

    fn tail_logs(&self, lines: usize) -> Result<Vec<String>, AdapterError> {
        self.daemon.tail_logs(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("listen=YES", true)]
    #[case("cmds_denied=DELE,RMD,RNFR", true)]
    #[case("local_root=/srv/sharehost/docs", true)]
    #[case("listen = YES", false)]
    #[case("listen= YES", false)]
    #[case("listen", false)]
    #[case("Listen=YES", false)]
    #[case("local_root=", false)]
    fn directive_lint(#[case] line: &str, #[case] accepted: bool) {
        assert_eq!(lint_directive(line).is_none(), accepted, "{line}");
    }
}
