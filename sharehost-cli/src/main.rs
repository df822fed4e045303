//! Sharehost: file-sharing protocol orchestrator CLI.
//!
//! # Usage
//!
//! ```text
//! sharehost protocol list|show|install|start|stop|uninstall|reset|status|config|reconcile|events
//! sharehost path list|create|update|delete
//! sharehost access list|grant|revoke
//! sharehost user list|add
//! sharehost sync [--dry-run]
//! sharehost diff <protocol>
//! sharehost logs access|summary|service
//! sharehost daemon start|stop|status|logs|install|uninstall
//! sharehost host [--root <dir>]
//! ```
//!
//! Every command except `daemon start` and `host` talks to the running daemon
//! over its Unix socket.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    access::AccessCommand, daemon::DaemonCommand, host::HostArgs, logs::LogsCommand,
    path::PathCommand, protocol::ProtocolCommand, sync::DiffArgs, sync::SyncArgs,
    user::UserCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "sharehost",
    version,
    about = "Install, configure and supervise FTP, SFTP, SMB and S3 file sharing",
    long_about = None,
)]
struct Cli {
    /// State directory (defaults to $SHAREHOST_STATE_DIR or /var/lib/sharehost).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Protocol lifecycle and configuration.
    Protocol {
        #[command(subcommand)]
        command: ProtocolCommand,
    },

    /// Shared paths under the storage root.
    Path {
        #[command(subcommand)]
        command: PathCommand,
    },

    /// Per-user permissions on shared paths.
    Access {
        #[command(subcommand)]
        command: AccessCommand,
    },

    /// User accounts known to the orchestrator.
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Regenerate native configs for every deployed protocol.
    Sync(SyncArgs),

    /// Show unified diff of what sync would write for a protocol.
    Diff(DiffArgs),

    /// Access logs, summaries and protocol daemon logs.
    Logs {
        #[command(subcommand)]
        command: LogsCommand,
    },

    /// Manage the sharehost daemon and its systemd unit.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Show the detected distribution and package manager.
    Host(HostArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let state_dir = cli
        .state_dir
        .unwrap_or_else(sharehost_core::config::state_dir_from_env);

    match cli.command {
        Commands::Protocol { command } => commands::protocol::run(&state_dir, command),
        Commands::Path { command } => commands::path::run(&state_dir, command),
        Commands::Access { command } => commands::access::run(&state_dir, command),
        Commands::User { command } => commands::user::run(&state_dir, command),
        Commands::Sync(args) => args.run(&state_dir),
        Commands::Diff(args) => args.run(&state_dir),
        Commands::Logs { command } => commands::logs::run(&state_dir, command),
        Commands::Daemon { command } => commands::daemon::run(&state_dir, command),
        Commands::Host(args) => args.run(),
    }
}
