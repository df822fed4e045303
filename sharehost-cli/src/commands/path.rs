//! `sharehost path`: shared directories and the protocols exposing them.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use sharehost_core::{ProtocolName, SharedPath};
use sharehost_daemon::{DaemonRequest, NewSharedPath, OperationReport, PathChange, SharedPathUpdate};

use super::{call_as, local_time, print_json, print_report};

#[derive(Subcommand, Debug)]
pub enum PathCommand {
    /// List shared paths.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Share a directory under the storage root.
    Create(CreateArgs),
    /// Rename, move or change the protocols of a shared path.
    Update(UpdateArgs),
    /// Stop sharing a directory. Its content is left on disk.
    Delete {
        /// Shared path id.
        id: String,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Display name, unique across shared paths.
    pub name: String,

    /// Directory, absolute or relative to the storage root.
    pub path: PathBuf,

    #[arg(long)]
    pub description: Option<String>,

    /// Protocols exposing the path, comma separated (e.g. `ftp,smb`).
    #[arg(long, value_delimiter = ',')]
    pub protocols: Vec<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Shared path id.
    pub id: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub path: Option<PathBuf>,

    #[arg(long)]
    pub description: Option<String>,

    /// Replace the protocol list, comma separated. Pass `--protocols ''` to clear it.
    #[arg(long, value_delimiter = ',')]
    pub protocols: Option<Vec<String>>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PathRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "protocols")]
    protocols: String,
    #[tabled(rename = "updated")]
    updated: String,
}

pub fn run(state_dir: &Path, command: PathCommand) -> Result<()> {
    match command {
        PathCommand::List { json } => list(state_dir, json),
        PathCommand::Create(args) => {
            let new = NewSharedPath {
                name: args.name,
                path: args.path,
                description: args.description,
                protocols: protocol_names(args.protocols),
            };
            let request = DaemonRequest::new("create_path").with_payload(json!(new));
            finish_change(call_as(state_dir, &request)?, "created", args.json)
        }
        PathCommand::Update(args) => {
            let update = SharedPathUpdate {
                name: args.name,
                path: args.path,
                description: args.description,
                protocols: args.protocols.map(protocol_names),
            };
            let mut payload = json!(update);
            if let Value::Object(map) = &mut payload {
                map.insert("id".to_string(), json!(args.id));
            }
            let request = DaemonRequest::new("update_path").with_payload(payload);
            finish_change(call_as(state_dir, &request)?, "updated", args.json)
        }
        PathCommand::Delete { id, json } => {
            let request = DaemonRequest::new("delete_path").with_payload(json!({ "id": id }));
            finish_change(call_as(state_dir, &request)?, "deleted", json)
        }
    }
}

fn list(state_dir: &Path, json: bool) -> Result<()> {
    let paths: Vec<SharedPath> = call_as(state_dir, &DaemonRequest::new("list_paths"))?;
    if json {
        return print_json(&paths);
    }
    if paths.is_empty() {
        println!("No shared paths.");
        return Ok(());
    }

    let rows: Vec<PathRow> = paths
        .into_iter()
        .map(|p| PathRow {
            id: p.id.to_string(),
            name: p.name,
            path: p.path.display().to_string(),
            protocols: if p.protocols.is_empty() {
                "-".to_string()
            } else {
                p.protocols.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(",")
            },
            updated: local_time(p.updated_at),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn finish_change(change: PathChange, verb: &str, json: bool) -> Result<()> {
    if json {
        return print_json(&change);
    }
    println!(
        "{} {} '{}' ({}) at {}",
        "✓".green().bold(),
        verb,
        change.path.name,
        change.path.id,
        change.path.path.display()
    );
    print_sync(&change.sync);
    if change.pending {
        println!(
            "{} still exposed by a protocol that failed to sync; removed on the next sync",
            "!".yellow().bold()
        );
    }
    Ok(())
}

/// Synchronization triggered by a model edit. Failures there do not undo the
/// edit, so they are shown but not turned into an error exit.
pub fn print_sync(reports: &[OperationReport]) {
    for report in reports {
        print!("  ");
        print_report(report);
    }
}

fn protocol_names(raw: Vec<String>) -> Vec<ProtocolName> {
    raw.into_iter()
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .map(ProtocolName::from)
        .collect()
}
