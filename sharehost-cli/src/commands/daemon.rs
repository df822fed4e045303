//! `sharehost daemon`: the background orchestrator process and its systemd unit.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};

use sharehost_adapters::SystemRunner;
use sharehost_daemon::paths::{socket_path, stderr_log_path, stdout_log_path, SYSTEMD_UNIT_DIR};
use sharehost_daemon::{
    install_service, request_status, request_stop, start_blocking, uninstall_service, DaemonError,
};

use super::print_json;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the orchestrator in the foreground (socket, watcher, reconcile).
    Start,
    /// Ask a running daemon to shut down.
    Stop(StopArgs),
    /// Runtime status as JSON; `running` is false when no daemon answers.
    Status,
    /// Write, enable and start the systemd unit.
    Install(UnitArgs),
    /// Stop, disable and remove the systemd unit.
    Uninstall(UnitArgs),
    /// Trailing lines of the daemon's own log files.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Seconds to wait for the socket to disappear (0 returns immediately).
    #[arg(long, default_value_t = 0)]
    pub wait: u64,
}

#[derive(Args, Debug)]
pub struct UnitArgs {
    /// Directory holding the unit file.
    #[arg(long, default_value = SYSTEMD_UNIT_DIR)]
    pub unit_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Only the error log.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn run(state_dir: &Path, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => start_blocking(state_dir).context("daemon exited with error"),
        DaemonCommand::Stop(args) => stop(state_dir, args.wait),
        DaemonCommand::Status => print_json(&status(state_dir)?),
        DaemonCommand::Install(args) => {
            let binary = std::env::current_exe().context("could not locate the sharehost binary")?;
            let unit = install_service(&SystemRunner, &args.unit_dir, state_dir, &binary)
                .context("failed to install systemd unit")?;
            println!("installed systemd unit {}", unit.display());
            Ok(())
        }
        DaemonCommand::Uninstall(args) => {
            uninstall_service(&SystemRunner, &args.unit_dir, state_dir)
                .context("failed to uninstall systemd unit")?;
            println!("removed systemd unit");
            Ok(())
        }
        DaemonCommand::Logs(args) => {
            let mut files = Vec::with_capacity(2);
            if !args.stderr_only {
                files.push(stdout_log_path(state_dir));
            }
            files.push(stderr_log_path(state_dir));
            for path in files {
                print_tail(&path, args.lines)?;
            }
            Ok(())
        }
    }
}

fn stop(state_dir: &Path, wait: u64) -> Result<()> {
    match request_stop(state_dir) {
        Ok(()) => {}
        Err(DaemonError::DaemonNotRunning { .. }) => {
            println!("daemon is not running");
            return Ok(());
        }
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    if wait == 0 {
        println!("daemon stop requested");
        return Ok(());
    }

    let socket = socket_path(state_dir);
    let deadline = Instant::now() + Duration::from_secs(wait);
    while socket.exists() {
        if Instant::now() >= deadline {
            bail!("daemon still running after {wait}s ({} exists)", socket.display());
        }
        sleep(Duration::from_millis(100));
    }
    println!("daemon stopped");
    Ok(())
}

fn status(state_dir: &Path) -> Result<Value> {
    match request_status(state_dir) {
        Ok(status) => Ok(status),
        Err(DaemonError::DaemonNotRunning { socket }) => Ok(json!({
            "running": false,
            "socket": socket.display().to_string(),
        })),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            println!("log file not found: {}", path.display());
            return Ok(());
        }
        Err(err) => return Err(err).with_context(|| format!("open {}", path.display())),
    };

    let mut tail = VecDeque::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if lines == 0 {
            continue;
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
