//! `sharehost sync` and `sharehost diff`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::{json, Value};

use sharehost_daemon::{DaemonRequest, OperationReport};
use sharehost_sync::ProtocolDiff;

use super::{call, call_as, print_json, print_report};

/// Arguments for `sharehost sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Report what would change without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, state_dir: &Path) -> Result<()> {
        let request = DaemonRequest::new("sync").with_payload(json!({ "dry_run": self.dry_run }));
        let data = call(state_dir, &request)?;
        if self.json {
            return print_json(&data);
        }

        let reports = sync_reports(data)?;
        if reports.is_empty() {
            println!("No deployed protocols to synchronize.");
            return Ok(());
        }
        for report in &reports {
            print_report(report);
        }

        let failed = reports.iter().filter(|r| !r.succeeded()).count();
        if failed > 0 {
            bail!("{failed} protocol(s) failed to synchronize");
        }
        Ok(())
    }
}

/// The daemon answers a queued sync with a summary object and a dry run with
/// the bare report list.
fn sync_reports(data: Value) -> Result<Vec<OperationReport>> {
    let reports = match data {
        Value::Object(mut map) => map.remove("reports").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(reports).context("unexpected 'sync' response")
}

/// Arguments for `sharehost diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Protocol to diff.
    pub protocol: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl DiffArgs {
    pub fn run(self, state_dir: &Path) -> Result<()> {
        let request = DaemonRequest::new("diff").with_protocol(&self.protocol);
        let result: ProtocolDiff = call_as(state_dir, &request)
            .with_context(|| format!("diff failed for '{}'", self.protocol))?;
        if self.json {
            return print_json(&result);
        }

        for warning in &result.warnings {
            eprintln!("warning: {warning}");
        }
        if result.diffs.is_empty() {
            println!("No differences for '{}'.", result.protocol);
            return Ok(());
        }

        for diff in result.diffs {
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sync_response_shapes_yield_reports() {
        let report = json!({
            "protocol": "smb",
            "operation": "sync",
            "outcome": "accepted",
            "status": "running",
        });
        let queued = json!({ "source": "socket", "reports": [report.clone()], "duration_ms": 12 });
        let preview = json!([report]);

        assert_eq!(sync_reports(queued).unwrap().len(), 1);
        let reports = sync_reports(preview).unwrap();
        assert_eq!(reports[0].protocol.as_str(), "smb");
        assert!(reports[0].succeeded());
    }
}
