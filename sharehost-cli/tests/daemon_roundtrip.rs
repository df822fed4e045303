//! Drives a real `sharehost daemon start` process through the CLI. No
//! protocol is installed, so nothing touches the host's packages or units.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;

struct Env {
    _tmp: TempDir,
    state: PathBuf,
    storage: PathBuf,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let state = tmp.path().join("state");
        let storage = tmp.path().join("storage");
        std::fs::create_dir_all(&storage).expect("mkdir storage");
        Self {
            _tmp: tmp,
            state,
            storage,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sharehost"));
        cmd.env("SHAREHOST_STATE_DIR", &self.state)
            .env("SHAREHOST_STORAGE_ROOT", &self.storage)
            .env("NO_COLOR", "1");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd().args(args).output().expect("run sharehost")
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "{args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("JSON output")
    }
}

struct DaemonProcess {
    child: Child,
}

impl DaemonProcess {
    fn start(env: &Env) -> Self {
        let child = env
            .cmd()
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        Self { child }
    }

    fn stop(&mut self, env: &Env) {
        let _ = env.run(&["daemon", "stop"]);
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

fn daemon_running(env: &Env) -> bool {
    let output = env.run(&["daemon", "status"]);
    output.status.success()
        && serde_json::from_slice::<Value>(&output.stdout)
            .ok()
            .and_then(|v| v.get("running").and_then(Value::as_bool))
            .unwrap_or(false)
}

fn socket_exists(state: &Path) -> bool {
    state.join("run").join("sharehost.sock").exists()
}

#[test]
fn model_edits_round_trip_through_the_socket() {
    let env = Env::new();
    let mut daemon = DaemonProcess::start(&env);
    assert!(
        wait_until(Duration::from_secs(10), || daemon_running(&env)),
        "daemon did not report running state in time"
    );
    assert!(socket_exists(&env.state));

    // Catalog: seven protocols, nothing installed.
    let protocols = env.json(&["protocol", "list", "--json"]);
    let protocols = protocols.as_array().expect("protocol array");
    assert_eq!(protocols.len(), 7);
    assert!(protocols.iter().all(|p| p["status"] == "uninstalled"));

    // Users and a path with no protocols yet.
    env.json(&["user", "add", "admin", "--admin", "--json"]);
    env.json(&["user", "add", "alice", "--json"]);
    let created = env.json(&["path", "create", "Public", "public", "--json"]);
    let path_id = created["path"]["id"].as_str().expect("path id").to_string();
    assert!(env.storage.join("public").is_dir());

    let grant = env.json(&["access", "grant", &path_id, "alice", "write", "--json"]);
    assert_eq!(grant["changed"], true);
    let rows = env.json(&["access", "list", "--path", &path_id, "--json"]);
    assert_eq!(rows[0]["user_id"], "alice");
    assert_eq!(rows[0]["permission"], "write");

    // Administrators never get explicit rows.
    let output = env.run(&["access", "grant", &path_id, "admin", "read"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Conflict"));

    // Exposing the path through an uninstalled protocol is refused.
    let output = env.run(&["path", "update", &path_id, "--protocols", "ftp"]);
    assert!(!output.status.success());

    // Lifecycle errors come back as reports with a failing exit code.
    let output = env.run(&["protocol", "start", "ftp"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("InvalidTransition"));

    let output = env.run(&["sync", "--dry-run"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No deployed protocols"));

    let status = env.json(&["protocol", "status", "smb", "--json"]);
    assert_eq!(status["status"], "uninstalled");

    daemon.stop(&env);
    assert!(
        wait_until(Duration::from_secs(3), || !socket_exists(&env.state)),
        "socket should be removed on shutdown"
    );
}
