//! Package installation through the host's package manager.

use std::sync::Arc;

use sharehost_detector::{CommandLine, PackageManager};

use crate::error::AdapterError;
use crate::runner::{CommandOutput, CommandRunner};

pub struct PackageInstaller {
    runner: Arc<dyn CommandRunner>,
    /// Detection failure is kept and reported on first use.
    manager: Result<PackageManager, String>,
}

impl PackageInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>, manager: PackageManager) -> Self {
        Self {
            runner,
            manager: Ok(manager),
        }
    }

    /// Detect the package manager from the host's os-release.
    pub fn detect(runner: Arc<dyn CommandRunner>) -> Self {
        let manager = sharehost_detector::detect_distro()
            .map(|d| d.package_manager)
            .map_err(|e| {
                tracing::warn!(error = %e, "package manager detection failed");
                e.to_string()
            });
        Self { runner, manager }
    }

    pub fn manager(&self) -> Result<PackageManager, AdapterError> {
        self.manager
            .clone()
            .map_err(AdapterError::UnsupportedDistribution)
    }

    /// Version of the first installed package among `packages`, if any.
    pub fn installed_version(&self, packages: &[&str]) -> Result<Option<String>, AdapterError> {
        let manager = self.manager()?;
        for package in packages {
            let out = self.exec(&manager.query_version(package))?;
            if out.success() {
                let version = out.stdout.trim();
                // pacman -Q prints "<name> <version>".
                let version = version.rsplit(' ').next().unwrap_or(version);
                if !version.is_empty() {
                    return Ok(Some(version.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Install `packages` unless the first one is already present.
    /// Returns the installed version and whether anything was installed.
    pub fn ensure_installed(&self, packages: &[&str]) -> Result<(Option<String>, bool), AdapterError> {
        if packages.is_empty() {
            return Ok((None, false));
        }
        if let Some(version) = self.installed_version(packages)? {
            tracing::info!(packages = ?packages, %version, "packages already installed");
            return Ok((Some(version), false));
        }
        let manager = self.manager()?;
        if let Some(refresh) = manager.refresh() {
            self.checked(&refresh)?;
        }
        self.checked(&manager.install(packages))?;
        tracing::info!(packages = ?packages, manager = %manager, "installed packages");
        Ok((self.installed_version(packages)?, true))
    }

    pub fn remove(&self, packages: &[&str]) -> Result<(), AdapterError> {
        if packages.is_empty() {
            return Ok(());
        }
        if self.installed_version(packages)?.is_none() {
            return Ok(());
        }
        let manager = self.manager()?;
        self.checked(&manager.remove(packages))?;
        tracing::info!(packages = ?packages, manager = %manager, "removed packages");
        Ok(())
    }

    fn exec(&self, cmd: &CommandLine) -> Result<CommandOutput, AdapterError> {
        self.runner.run(cmd.program, &cmd.args)
    }

    fn checked(&self, cmd: &CommandLine) -> Result<CommandOutput, AdapterError> {
        let out = self.exec(cmd)?;
        if !out.success() {
            return Err(AdapterError::PackageManager {
                program: cmd.program.to_string(),
                output: out.combined(),
            });
        }
        Ok(out)
    }
}
