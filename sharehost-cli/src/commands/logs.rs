//! `sharehost logs`: access log queries and protocol daemon logs.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use sharehost_core::{AccessAction, AccessFilter, AccessLogEntry, AccessOutcome, AccessSummary};
use sharehost_daemon::DaemonRequest;

use super::{call_as, local_time, or_dash, print_json};

#[derive(Subcommand, Debug)]
pub enum LogsCommand {
    /// Query file-level access entries, oldest first.
    Access(AccessArgs),
    /// Totals by outcome, action and protocol.
    Summary {
        /// Only entries at or after this RFC 3339 time.
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Recent log lines of a protocol's daemon.
    Service {
        protocol: String,

        /// Number of trailing lines to show.
        #[arg(long, default_value_t = 200)]
        lines: usize,
    },
}

#[derive(Args, Debug)]
pub struct AccessArgs {
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub protocol: Option<String>,

    #[arg(long)]
    pub action: Option<AccessAction>,

    #[arg(long)]
    pub outcome: Option<AccessOutcome>,

    /// Inclusive RFC 3339 lower bound.
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Inclusive RFC 3339 upper bound.
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct AccessRow {
    #[tabled(rename = "time")]
    time: String,
    #[tabled(rename = "protocol")]
    protocol: String,
    #[tabled(rename = "user")]
    user: String,
    #[tabled(rename = "action")]
    action: String,
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "from")]
    source: String,
    #[tabled(rename = "outcome")]
    outcome: String,
}

pub fn run(state_dir: &Path, command: LogsCommand) -> Result<()> {
    match command {
        LogsCommand::Access(args) => access(state_dir, args),
        LogsCommand::Summary { since, json } => summary(state_dir, since, json),
        LogsCommand::Service { protocol, lines } => {
            let request = DaemonRequest::new("tail_logs")
                .with_protocol(&protocol)
                .with_payload(json!({ "lines": lines }));
            let tail: Vec<String> = call_as(state_dir, &request)?;
            println!("==> {protocol} <==");
            for line in tail {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn access(state_dir: &Path, args: AccessArgs) -> Result<()> {
    let filter = AccessFilter {
        user_id: args.user.map(Into::into),
        protocol: args.protocol.map(Into::into),
        action: args.action,
        outcome: args.outcome,
        from: args.from,
        to: args.to,
    };
    let mut payload = json!(filter);
    if let Value::Object(map) = &mut payload {
        map.insert("offset".to_string(), json!(args.offset));
        map.insert("limit".to_string(), json!(args.limit));
    }
    let request = DaemonRequest::new("access_logs").with_payload(payload);
    let entries: Vec<AccessLogEntry> = call_as(state_dir, &request)?;
    if args.json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No matching access entries.");
        return Ok(());
    }

    let rows: Vec<AccessRow> = entries
        .into_iter()
        .map(|e| AccessRow {
            time: local_time(e.timestamp),
            protocol: e.protocol.to_string(),
            user: or_dash(e.user_id.as_ref()),
            action: e.action.as_str().to_string(),
            file: or_dash(e.file_path.as_ref()),
            source: e.source_addr,
            outcome: outcome_label(e.outcome, e.error.as_deref()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn summary(state_dir: &Path, since: Option<DateTime<Utc>>, json: bool) -> Result<()> {
    let request = DaemonRequest::new("log_summary").with_payload(json!({ "since": since }));
    let summary: AccessSummary = call_as(state_dir, &request)?;
    if json {
        return print_json(&summary);
    }

    println!("{} access entries", summary.total.to_string().bold());
    for (title, counts) in [
        ("by outcome", &summary.by_outcome),
        ("by action", &summary.by_action),
        ("by protocol", &summary.by_protocol),
    ] {
        if counts.is_empty() {
            continue;
        }
        println!("{title}:");
        for (key, count) in counts {
            println!("  {key:<10} {count}");
        }
    }
    Ok(())
}

fn outcome_label(outcome: AccessOutcome, error: Option<&str>) -> String {
    let label = match outcome {
        AccessOutcome::Success => outcome.as_str().green().to_string(),
        AccessOutcome::Failed => outcome.as_str().red().to_string(),
        AccessOutcome::Denied => outcome.as_str().yellow().to_string(),
    };
    match error {
        Some(error) => format!("{label} ({error})"),
        None => label,
    }
}
