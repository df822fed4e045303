use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SERVICE_NAME: &str = "sharehost";
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "sharehost.sock";

pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

pub fn run_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("run")
}

pub fn socket_path(state_dir: &Path) -> PathBuf {
    run_dir(state_dir).join(DAEMON_SOCKET)
}

pub fn logs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("logs")
}

pub fn stdout_log_path(state_dir: &Path) -> PathBuf {
    logs_dir(state_dir).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(state_dir: &Path) -> PathBuf {
    logs_dir(state_dir).join(DAEMON_STDERR_LOG)
}

/// Record directories whose external edits trigger re-synchronization.
pub fn watched_dirs(state_dir: &Path) -> [PathBuf; 3] {
    [
        sharehost_core::store::paths_dir_at(state_dir),
        sharehost_core::store::access_dir_at(state_dir),
        sharehost_core::store::users_dir_at(state_dir),
    ]
}

pub fn unit_path(unit_dir: &Path) -> PathBuf {
    unit_dir.join(format!("{SERVICE_NAME}.service"))
}
