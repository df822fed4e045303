//! Registered protocols without an implementation (NFS, WebDAV, NextCloud).

use std::path::PathBuf;

use sharehost_core::registry::ProtocolDescriptor;
use sharehost_core::types::DesiredConfig;
use sharehost_renderer::RenderedFile;

use crate::adapter::{InstallOutcome, ProbedStatus, ProtocolAdapter};
use crate::error::AdapterError;
use crate::writer::ApplyReport;

pub struct StubAdapter {
    descriptor: &'static ProtocolDescriptor,
}

impl StubAdapter {
    pub fn new(descriptor: &'static ProtocolDescriptor) -> Self {
        Self { descriptor }
    }

    fn not_implemented(&self, operation: &'static str) -> AdapterError {
        AdapterError::NotImplemented {
            protocol: self.descriptor.name,
            operation,
        }
    }
}

impl ProtocolAdapter for StubAdapter {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        self.descriptor
    }

    fn install(&self) -> Result<InstallOutcome, AdapterError> {
        Err(self.not_implemented("install"))
    }

    fn uninstall(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn configure(&self, _desired: &DesiredConfig, _dry_run: bool) -> Result<ApplyReport, AdapterError> {
        Err(self.not_implemented("configure"))
    }

    fn reload(&self) -> Result<(), AdapterError> {
        Err(self.not_implemented("reload"))
    }

    fn start(&self) -> Result<(), AdapterError> {
        Err(self.not_implemented("start"))
    }

    fn stop(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    fn probe_status(&self, _port: u16) -> Result<ProbedStatus, AdapterError> {
        Ok(ProbedStatus::NotInstalled)
    }

    fn installed_version(&self) -> Result<Option<String>, AdapterError> {
        Ok(None)
    }

    fn live_config_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn render(&self, _desired: &DesiredConfig) -> Result<Vec<RenderedFile>, AdapterError> {
        Err(self.not_implemented("render"))
    }

    fn tail_logs(&self, _lines: usize) -> Result<Vec<String>, AdapterError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharehost_core::registry;

    #[test]
    fn lifecycle_calls_are_not_implemented() {
        for name in ["nfs", "webdav", "nextcloud"] {
            let adapter = StubAdapter::new(registry::describe(name).unwrap());
            let err = adapter.install().unwrap_err();
            assert_eq!(err.kind(), "NotImplemented");
            assert!(err.to_string().contains(name));
            assert!(adapter.start().is_err());
            assert_eq!(adapter.probe_status(2049).unwrap(), ProbedStatus::NotInstalled);
        }
    }
}
