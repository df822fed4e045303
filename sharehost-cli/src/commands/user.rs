//! `sharehost user`: accounts mirrored from the authentication provider.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use sharehost_core::{UserAccount, UserId};
use sharehost_daemon::{DaemonRequest, UserChange};

use super::path::print_sync;
use super::{call_as, print_json};

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// List known users.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Add a user, or update the one with the same id.
    Add(AddArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Login name used in every protocol's native config.
    pub username: String,

    /// Stable user id (defaults to the username).
    #[arg(long)]
    pub id: Option<String>,

    /// Administrators get full access to every shared path.
    #[arg(long)]
    pub admin: bool,

    /// Keep the account but leave it out of every native config.
    #[arg(long)]
    pub inactive: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "username")]
    username: String,
    #[tabled(rename = "role")]
    role: String,
    #[tabled(rename = "active")]
    active: String,
}

pub fn run(state_dir: &Path, command: UserCommand) -> Result<()> {
    match command {
        UserCommand::List { json } => list(state_dir, json),
        UserCommand::Add(args) => add(state_dir, args),
    }
}

fn list(state_dir: &Path, json: bool) -> Result<()> {
    let users: Vec<UserAccount> = call_as(state_dir, &DaemonRequest::new("list_users"))?;
    if json {
        return print_json(&users);
    }
    if users.is_empty() {
        println!("No users.");
        return Ok(());
    }

    let rows: Vec<UserRow> = users
        .into_iter()
        .map(|u| UserRow {
            id: u.id.to_string(),
            username: u.username,
            role: if u.is_admin {
                "admin".green().to_string()
            } else {
                "user".to_string()
            },
            active: if u.is_active {
                "yes".to_string()
            } else {
                "no".bright_black().to_string()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn add(state_dir: &Path, args: AddArgs) -> Result<()> {
    let user = UserAccount {
        id: UserId::from(args.id.unwrap_or_else(|| args.username.clone())),
        username: args.username,
        is_admin: args.admin,
        is_active: !args.inactive,
    };
    let request = DaemonRequest::new("upsert_user").with_payload(json!(user));
    let change: UserChange = call_as(state_dir, &request)?;
    if args.json {
        return print_json(&change);
    }

    println!(
        "{} {} ({}){}",
        "✓".green().bold(),
        change.user.username,
        change.user.id,
        if change.user.is_admin { ", administrator" } else { "" }
    );
    if !change.dropped_access.is_empty() {
        println!(
            "  dropped {} explicit access row(s); administrators have full access",
            change.dropped_access.len()
        );
    }
    print_sync(&change.sync);
    Ok(())
}
