//! CLI behavior that needs no running daemon.

use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn sharehost_cmd(state_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sharehost"));
    cmd.env("SHAREHOST_STATE_DIR", state_dir)
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn help_lists_command_groups() {
    let state = TempDir::new().expect("state");
    let assert = sharehost_cmd(state.path()).arg("--help").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    for group in ["protocol", "path", "access", "user", "sync", "diff", "logs", "daemon"] {
        assert!(stdout.contains(group), "help should mention '{group}'");
    }
}

#[test]
fn socket_commands_explain_a_stopped_daemon() {
    let state = TempDir::new().expect("state");
    sharehost_cmd(state.path())
        .args(["protocol", "list"])
        .assert()
        .failure()
        .stderr(contains("daemon is not running"))
        .stderr(contains("sharehost daemon start"));
}

#[test]
fn daemon_status_reports_not_running() {
    let state = TempDir::new().expect("state");
    let output = sharehost_cmd(state.path())
        .args(["daemon", "status"])
        .output()
        .expect("run daemon status");
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("status JSON");
    assert_eq!(value["running"], false);
    assert!(value["socket"]
        .as_str()
        .expect("socket path")
        .ends_with("sharehost.sock"));
}

#[test]
fn daemon_stop_without_daemon_is_not_an_error() {
    let state = TempDir::new().expect("state");
    sharehost_cmd(state.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn daemon_logs_tail_existing_files() {
    let state = TempDir::new().expect("state");
    let logs = state.path().join("logs");
    fs::create_dir_all(&logs).expect("mkdir logs");
    let content: String = (1..=5).map(|n| format!("line {n}\n")).collect();
    fs::write(logs.join("daemon.log"), content).expect("write log");

    let assert = sharehost_cmd(state.path())
        .args(["daemon", "logs", "--lines", "2"])
        .assert()
        .success()
        .stdout(contains("line 5"))
        .stdout(contains("log file not found"));
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    assert!(stdout.contains("line 4"));
    assert!(!stdout.contains("line 3"), "only the last two lines are shown");
}

#[test]
fn host_shows_package_commands_for_detected_distro() {
    let state = TempDir::new().expect("state");
    let root = TempDir::new().expect("root");
    fs::create_dir_all(root.path().join("etc")).expect("mkdir etc");
    fs::write(
        root.path().join("etc/os-release"),
        "ID=ubuntu\nVERSION_ID=\"22.04\"\nID_LIKE=debian\n",
    )
    .expect("write os-release");

    sharehost_cmd(state.path())
        .args(["host", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(contains("ubuntu"))
        .stdout(contains("apt-get install -y vsftpd"));
}

#[test]
fn unknown_permission_level_is_rejected_before_any_request() {
    let state = TempDir::new().expect("state");
    sharehost_cmd(state.path())
        .args(["access", "grant", "some-path", "alice", "superuser"])
        .assert()
        .failure()
        .stderr(contains("superuser"));
}
