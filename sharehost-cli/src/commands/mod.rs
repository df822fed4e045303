//! Subcommand implementations and the daemon client helpers they share.

pub mod access;
pub mod daemon;
pub mod host;
pub mod logs;
pub mod path;
pub mod protocol;
pub mod sync;
pub mod user;

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use sharehost_core::ProtocolStatus;
use sharehost_daemon::{send_request, DaemonError, DaemonRequest, DaemonResponse, OperationReport, Outcome};

// ---------------------------------------------------------------------------
// Daemon client
// ---------------------------------------------------------------------------

/// Send `request` and return the response data, failing on a daemon error.
pub fn call(state_dir: &Path, request: &DaemonRequest) -> Result<Value> {
    let response = send(state_dir, request)?;
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    Err(response_error(response.kind.as_deref(), response.error))
}

pub fn call_as<T: DeserializeOwned>(state_dir: &Path, request: &DaemonRequest) -> Result<T> {
    let data = call(state_dir, request)?;
    serde_json::from_value(data).with_context(|| format!("unexpected '{}' response", request.cmd))
}

/// Lifecycle commands answer with a report even when the operation failed.
pub fn call_report(state_dir: &Path, request: &DaemonRequest) -> Result<OperationReport> {
    let response = send(state_dir, request)?;
    match response.data {
        Some(data) if !data.is_null() => serde_json::from_value(data)
            .with_context(|| format!("unexpected '{}' response", request.cmd)),
        _ => Err(response_error(response.kind.as_deref(), response.error)),
    }
}

fn send(state_dir: &Path, request: &DaemonRequest) -> Result<DaemonResponse> {
    match send_request(state_dir, request) {
        Ok(response) => Ok(response),
        Err(DaemonError::DaemonNotRunning { socket }) => bail!(
            "daemon is not running (no socket at {}); start it with `sharehost daemon start`",
            socket.display()
        ),
        Err(err) => Err(err).with_context(|| format!("'{}' request failed", request.cmd)),
    }
}

fn response_error(kind: Option<&str>, message: Option<String>) -> anyhow::Error {
    let message = message.unwrap_or_else(|| "unknown daemon error".to_string());
    match kind {
        Some(kind) => anyhow!("{kind}: {message}"),
        None => anyhow!(message),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}

/// Print one operation report. Errors when the operation did not succeed.
pub fn finish_report(report: &OperationReport, json: bool) -> Result<()> {
    if json {
        print_json(report)?;
    } else {
        print_report(report);
    }
    if report.succeeded() {
        Ok(())
    } else {
        bail!("{} {} did not complete", report.operation, report.protocol)
    }
}

pub fn print_report(report: &OperationReport) {
    let status = report
        .status
        .map(status_label)
        .unwrap_or_else(|| "-".bright_black().to_string());
    let marker = match report.outcome {
        Outcome::Accepted => "✓".green().bold(),
        Outcome::NoOp => "=".bright_black().bold(),
        Outcome::InProgress => "…".yellow().bold(),
        Outcome::Failed => "✗".red().bold(),
    };
    let note = match report.outcome {
        Outcome::NoOp => " (no change)".bright_black().to_string(),
        Outcome::InProgress => " (busy, retry later)".yellow().to_string(),
        _ => String::new(),
    };
    println!("{marker} {} {}: {status}{note}", report.operation, report.protocol.to_string().bold());

    if let Some(detail) = &report.detail {
        match &report.kind {
            Some(kind) => println!("  {} {detail}", format!("{kind}:").red()),
            None => println!("  {detail}"),
        }
    }
    for warning in &report.warnings {
        println!("  {} {warning}", "warning:".yellow());
    }
}

pub fn status_label(status: ProtocolStatus) -> String {
    let text = status.as_str();
    match status {
        ProtocolStatus::Running => text.green().bold().to_string(),
        ProtocolStatus::Installed => text.blue().to_string(),
        ProtocolStatus::Stopped => text.yellow().to_string(),
        ProtocolStatus::Error => text.red().bold().to_string(),
        ProtocolStatus::Uninstalled => text.bright_black().to_string(),
        ProtocolStatus::Installing | ProtocolStatus::Starting | ProtocolStatus::Stopping => {
            text.cyan().to_string()
        }
    }
}

pub fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn or_dash(value: Option<impl ToString>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
