//! `sharehost protocol`: catalog, lifecycle and settings of each protocol.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use sharehost_core::{LifecycleEvent, ProtocolRecord, ProtocolRuntimeState, ProtocolSettings};
use sharehost_daemon::{DaemonRequest, ProtocolSummary};
use sharehost_sync::{applied_age, DriftSignal};

use super::{call, call_as, call_report, finish_report, local_time, or_dash, print_json, status_label};

#[derive(Subcommand, Debug)]
pub enum ProtocolCommand {
    /// List every protocol with its live status.
    List(JsonArgs),
    /// Show one protocol's record, runtime state and config drift.
    Show(TargetArgs),
    /// Install packages and write the initial native config.
    Install(TargetArgs),
    /// Sync the native config and start the daemon.
    Start(TargetArgs),
    /// Stop the daemon. Config and packages stay in place.
    Stop(TargetArgs),
    /// Remove the daemon's packages. Refused while a shared path uses it.
    Uninstall(TargetArgs),
    /// Clear an `error` status back to `uninstalled`.
    Reset(TargetArgs),
    /// Current status; never waits on an in-flight operation.
    Status(TargetArgs),
    /// Change port, TLS or extra options.
    Config(ConfigArgs),
    /// Compare the recorded status with the host and correct drift.
    Reconcile(TargetArgs),
    /// Recent lifecycle events.
    Events(EventsArgs),
}

#[derive(Args, Debug)]
pub struct JsonArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Protocol name (ftp, sftp, smb, s3, nfs, webdav, nextcloud).
    pub protocol: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    pub protocol: String,

    /// Listening port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Enable or disable TLS.
    #[arg(long)]
    pub tls: Option<bool>,

    /// Refuse plaintext sessions (requires TLS).
    #[arg(long)]
    pub force_tls: Option<bool>,

    /// Passive data port range, e.g. `40000-40100`.
    #[arg(long, value_parser = parse_port_range)]
    pub passive_ports: Option<(u16, u16)>,

    /// Extra native option, `KEY=VALUE`. Repeatable.
    #[arg(long = "set", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Remove an extra native option. Repeatable.
    #[arg(long)]
    pub unset: Vec<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct EventsArgs {
    /// Only events for this protocol.
    pub protocol: Option<String>,

    /// Number of most recent events.
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// The parts of a `get_protocol` response the CLI renders.
#[derive(Debug, Deserialize)]
struct ProtocolDetail {
    #[serde(flatten)]
    summary: ProtocolSummary,
    acl_model: String,
    tls: bool,
    packages: Vec<String>,
    units: Vec<String>,
    record: ProtocolRecord,
    runtime: ProtocolRuntimeState,
    live_config: Vec<PathBuf>,
    #[serde(default)]
    drift: Option<DriftSignal>,
}

#[derive(Tabled)]
struct ProtocolRow {
    #[tabled(rename = "protocol")]
    name: String,
    #[tabled(rename = "name")]
    display_name: String,
    #[tabled(rename = "port")]
    port: u16,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "implemented")]
    implemented: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "time")]
    time: String,
    #[tabled(rename = "protocol")]
    protocol: String,
    #[tabled(rename = "operation")]
    operation: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "ms")]
    duration_ms: u64,
    #[tabled(rename = "detail")]
    detail: String,
}

pub fn run(state_dir: &Path, command: ProtocolCommand) -> Result<()> {
    match command {
        ProtocolCommand::List(args) => list(state_dir, args.json),
        ProtocolCommand::Show(args) => show(state_dir, &args),
        ProtocolCommand::Install(args) => lifecycle(state_dir, "install", &args),
        ProtocolCommand::Start(args) => lifecycle(state_dir, "start", &args),
        ProtocolCommand::Stop(args) => lifecycle(state_dir, "stop", &args),
        ProtocolCommand::Uninstall(args) => lifecycle(state_dir, "uninstall", &args),
        ProtocolCommand::Reset(args) => lifecycle(state_dir, "reset", &args),
        ProtocolCommand::Reconcile(args) => lifecycle(state_dir, "reconcile", &args),
        ProtocolCommand::Status(args) => status(state_dir, &args),
        ProtocolCommand::Config(args) => config(state_dir, args),
        ProtocolCommand::Events(args) => events(state_dir, args),
    }
}

fn list(state_dir: &Path, json: bool) -> Result<()> {
    let protocols: Vec<ProtocolSummary> = call_as(state_dir, &DaemonRequest::new("list_protocols"))?;
    if json {
        return print_json(&protocols);
    }

    let rows: Vec<ProtocolRow> = protocols
        .into_iter()
        .map(|p| ProtocolRow {
            name: p.name.to_string(),
            display_name: p.display_name,
            port: p.port,
            status: status_label(p.status),
            implemented: if p.implemented {
                "yes".to_string()
            } else {
                "stub".bright_black().to_string()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn show(state_dir: &Path, args: &TargetArgs) -> Result<()> {
    let request = DaemonRequest::new("get_protocol").with_protocol(&args.protocol);
    if args.json {
        return print_json(&call(state_dir, &request)?);
    }
    let detail: ProtocolDetail = call_as(state_dir, &request)?;
    let settings = &detail.record.settings;

    println!("{} ({})", detail.summary.display_name.bold(), detail.summary.name);
    println!("  status:      {}", status_label(detail.runtime.status));
    println!("  port:        {} (default {})", detail.summary.port, detail.summary.default_port);
    println!("  acl model:   {}", detail.acl_model);
    if detail.tls {
        println!(
            "  tls:         {}{}",
            if settings.tls_enabled { "enabled" } else { "disabled" },
            if settings.force_tls { ", forced" } else { "" }
        );
    }
    if let Some((low, high)) = settings.passive_port_range {
        println!("  passive:     {low}-{high}");
    }
    for (key, value) in &settings.extra {
        println!("  option:      {key} = {value}");
    }
    if !detail.packages.is_empty() {
        println!("  packages:    {}", detail.packages.join(", "));
    }
    if !detail.units.is_empty() {
        println!("  units:       {}", detail.units.join(", "));
    }
    println!("  version:     {}", or_dash(detail.record.installed_version.as_ref()));
    if let Some(at) = detail.record.installed_at {
        println!("  installed:   {}", local_time(at));
    }
    if let Some(op) = &detail.runtime.in_flight {
        println!("  in flight:   {}", op.cyan());
    }
    if let Some(err) = &detail.runtime.last_error {
        println!("  last error:  {}", err.red());
    }
    if let Some(rollback) = &detail.runtime.rollback_candidate {
        println!("  rollback:    {}", rollback.display());
    }
    for path in &detail.live_config {
        println!("  config:      {}", path.display());
    }
    if let Some(drift) = &detail.drift {
        println!("  drift:       {}", describe_drift(drift));
    }
    Ok(())
}

fn lifecycle(state_dir: &Path, cmd: &str, args: &TargetArgs) -> Result<()> {
    let report = call_report(state_dir, &DaemonRequest::new(cmd).with_protocol(&args.protocol))?;
    finish_report(&report, args.json)
}

fn status(state_dir: &Path, args: &TargetArgs) -> Result<()> {
    let state: ProtocolRuntimeState = call_as(
        state_dir,
        &DaemonRequest::new("get_status").with_protocol(&args.protocol),
    )?;
    if args.json {
        return print_json(&state);
    }
    print!("{}: {}", state.name, status_label(state.status));
    if let Some(op) = &state.in_flight {
        print!(" ({} in flight)", op.split(':').next().unwrap_or(op));
    }
    println!();
    if let Some(err) = &state.last_error {
        println!("  {}", err.red());
    }
    Ok(())
}

fn config(state_dir: &Path, args: ConfigArgs) -> Result<()> {
    let current: ProtocolDetail = call_as(
        state_dir,
        &DaemonRequest::new("get_protocol").with_protocol(&args.protocol),
    )
    .context("failed to load current settings")?;
    let settings = merge_settings(current.record.settings, &args);

    let request = DaemonRequest::new("update_config")
        .with_protocol(&args.protocol)
        .with_payload(json!(settings));
    let report = call_report(state_dir, &request)?;
    finish_report(&report, args.json)
}

fn merge_settings(mut settings: ProtocolSettings, args: &ConfigArgs) -> ProtocolSettings {
    if let Some(port) = args.port {
        settings.port = Some(port);
    }
    if let Some(tls) = args.tls {
        settings.tls_enabled = tls;
    }
    if let Some(force) = args.force_tls {
        settings.force_tls = force;
    }
    if let Some(range) = args.passive_ports {
        settings.passive_port_range = Some(range);
    }
    for key in &args.unset {
        settings.extra.remove(key);
    }
    for (key, value) in &args.set {
        settings.extra.insert(key.clone(), value.clone());
    }
    settings
}

fn events(state_dir: &Path, args: EventsArgs) -> Result<()> {
    let mut request = DaemonRequest::new("events").with_payload(json!({ "limit": args.limit }));
    if let Some(protocol) = &args.protocol {
        request = request.with_protocol(protocol);
    }
    let events: Vec<LifecycleEvent> = call_as(state_dir, &request)?;
    if args.json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No lifecycle events recorded.");
        return Ok(());
    }

    let rows: Vec<EventRow> = events
        .into_iter()
        .map(|e| EventRow {
            time: local_time(e.timestamp),
            protocol: e.protocol.to_string(),
            operation: e.operation,
            outcome: format!("{:?}", e.outcome).to_lowercase(),
            status: status_label(e.status),
            duration_ms: e.duration_ms,
            detail: e.detail.unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn describe_drift(drift: &DriftSignal) -> String {
    let files = |files: &[PathBuf]| {
        files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match drift {
        DriftSignal::NeverApplied => "never applied".bright_black().to_string(),
        DriftSignal::Current { applied_at } => {
            format!(
                "{} (applied {}, {} ago)",
                "current".green(),
                local_time(*applied_at),
                applied_age(*applied_at)
            )
        }
        DriftSignal::Missing { files: f } => format!("{} {}", "missing".red(), files(f)),
        DriftSignal::Modified { files: f } => {
            format!("{} {}", "edited outside sharehost".yellow(), files(f))
        }
    }
}

fn parse_port_range(raw: &str) -> Result<(u16, u16), String> {
    let (low, high) = raw
        .split_once('-')
        .ok_or_else(|| format!("expected LOW-HIGH, got '{raw}'"))?;
    let low: u16 = low.trim().parse().map_err(|e| format!("bad port '{low}': {e}"))?;
    let high: u16 = high.trim().parse().map_err(|e| format!("bad port '{high}': {e}"))?;
    Ok((low, high))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ConfigArgs {
        ConfigArgs {
            protocol: "ftp".into(),
            port: None,
            tls: None,
            force_tls: None,
            passive_ports: None,
            set: Vec::new(),
            unset: Vec::new(),
            json: false,
        }
    }

    #[test]
    fn merge_keeps_unmentioned_settings() {
        let mut current = ProtocolSettings {
            port: Some(2121),
            tls_enabled: true,
            ..Default::default()
        };
        current.extra.insert("idle_session_timeout".into(), "600".into());
        current.extra.insert("banner".into(), "hi".into());

        let mut change = args();
        change.force_tls = Some(true);
        change.set.push(("max_clients".into(), "20".into()));
        change.unset.push("banner".into());

        let merged = merge_settings(current, &change);
        assert_eq!(merged.port, Some(2121));
        assert!(merged.tls_enabled && merged.force_tls);
        assert_eq!(merged.extra.get("idle_session_timeout").map(String::as_str), Some("600"));
        assert_eq!(merged.extra.get("max_clients").map(String::as_str), Some("20"));
        assert!(!merged.extra.contains_key("banner"));
    }

    #[test]
    fn port_range_and_options_parse() {
        assert_eq!(parse_port_range("40000-40100"), Ok((40000, 40100)));
        assert!(parse_port_range("40000").is_err());
        assert!(parse_port_range("a-b").is_err());
        assert_eq!(
            parse_key_value("pasv_address=10.0.0.2"),
            Ok(("pasv_address".into(), "10.0.0.2".into()))
        );
        assert!(parse_key_value("=x").is_err());
    }
}
