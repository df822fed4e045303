//! `sharehost access`: explicit per-user permissions on shared paths.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use sharehost_core::{PermissionLevel, SharedPath, UserAccount, UserProtocolAccess};
use sharehost_daemon::{AccessChange, DaemonRequest};

use super::path::print_sync;
use super::{call_as, local_time, print_json};

#[derive(Subcommand, Debug)]
pub enum AccessCommand {
    /// List access rows, optionally for one shared path.
    List {
        /// Shared path id.
        #[arg(long)]
        path: Option<String>,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Grant or change a user's permission on a shared path.
    Grant {
        /// Shared path id.
        path: String,
        /// User id.
        user: String,
        /// read, write or full.
        level: PermissionLevel,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove a user's permission on a shared path.
    Revoke {
        /// Shared path id.
        path: String,
        /// User id.
        user: String,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Tabled)]
struct AccessRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "user")]
    user: String,
    #[tabled(rename = "permission")]
    permission: String,
    #[tabled(rename = "granted")]
    granted: String,
}

pub fn run(state_dir: &Path, command: AccessCommand) -> Result<()> {
    match command {
        AccessCommand::List { path, json } => list(state_dir, path, json),
        AccessCommand::Grant {
            path,
            user,
            level,
            json,
        } => {
            let request = DaemonRequest::new("grant_access").with_payload(json!({
                "path_id": path,
                "user_id": user,
                "permission": level,
            }));
            finish_change(call_as(state_dir, &request)?, json)
        }
        AccessCommand::Revoke { path, user, json } => {
            let request = DaemonRequest::new("revoke_access")
                .with_payload(json!({ "path_id": path, "user_id": user }));
            finish_change(call_as(state_dir, &request)?, json)
        }
    }
}

fn list(state_dir: &Path, path: Option<String>, json: bool) -> Result<()> {
    let request = DaemonRequest::new("list_access").with_payload(json!({ "path_id": path }));
    let rows: Vec<UserProtocolAccess> = call_as(state_dir, &request)?;
    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No explicit access rows. Administrators have full access everywhere.");
        return Ok(());
    }

    let paths: HashMap<String, String> = call_as::<Vec<SharedPath>>(state_dir, &DaemonRequest::new("list_paths"))?
        .into_iter()
        .map(|p| (p.id.to_string(), p.name))
        .collect();
    let users: HashMap<String, String> = call_as::<Vec<UserAccount>>(state_dir, &DaemonRequest::new("list_users"))?
        .into_iter()
        .map(|u| (u.id.to_string(), u.username))
        .collect();

    let rows: Vec<AccessRow> = rows
        .into_iter()
        .map(|row| {
            let path_id = row.path_id.to_string();
            let user_id = row.user_id.to_string();
            AccessRow {
                path: paths.get(&path_id).cloned().unwrap_or(path_id),
                user: users.get(&user_id).cloned().unwrap_or(user_id),
                permission: permission_label(row.permission),
                granted: local_time(row.created_at),
            }
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn finish_change(change: AccessChange, json: bool) -> Result<()> {
    if json {
        return print_json(&change);
    }
    let what = match change.permission {
        Some(level) => format!("{} on {}", permission_label(level), change.path_id),
        None => format!("no explicit access on {}", change.path_id),
    };
    if change.changed {
        println!("{} {} now has {what}", "✓".green().bold(), change.user_id);
    } else {
        println!("{} {} already has {what}", "=".bright_black().bold(), change.user_id);
    }
    print_sync(&change.sync);
    if change.pending {
        println!(
            "{} still granted by a protocol that failed to sync; retried on the next sync",
            "!".yellow().bold()
        );
    }
    Ok(())
}

fn permission_label(level: PermissionLevel) -> String {
    match level {
        PermissionLevel::Read => "read".to_string(),
        PermissionLevel::Write => "write".yellow().to_string(),
        PermissionLevel::Full => "full".green().to_string(),
    }
}
