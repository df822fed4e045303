//! systemd unit for running the daemon at boot.

use std::fs;
use std::path::{Path, PathBuf};

use sharehost_adapters::CommandRunner;

use crate::error::{io_err, DaemonError};
use crate::paths::{
    logs_dir, run_dir, socket_path, stderr_log_path, stdout_log_path, unit_path, SERVICE_NAME,
};

/// Unit text running `<binary> daemon start` with the given state directory.
pub fn generate_unit(binary_path: &Path, state_dir: &Path) -> String {
    format!(
        r#"[Unit]
Description=sharehost file-sharing protocol orchestrator
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
Environment=SHAREHOST_STATE_DIR={state_dir}
ExecStart={binary} daemon start
Restart=on-failure
RestartSec=2
StandardOutput=append:{stdout}
StandardError=append:{stderr}

[Install]
WantedBy=multi-user.target
"#,
        state_dir = state_dir.display(),
        binary = binary_path.display(),
        stdout = stdout_log_path(state_dir).display(),
        stderr = stderr_log_path(state_dir).display(),
    )
}

/// Write the unit, reload systemd and enable the service now.
pub fn install(
    runner: &dyn CommandRunner,
    unit_dir: &Path,
    state_dir: &Path,
    binary_path: &Path,
) -> Result<PathBuf, DaemonError> {
    for dir in [unit_dir.to_path_buf(), logs_dir(state_dir), run_dir(state_dir)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }

    let unit = unit_path(unit_dir);
    fs::write(&unit, generate_unit(binary_path, state_dir)).map_err(|e| io_err(&unit, e))?;

    let service = format!("{SERVICE_NAME}.service");
    systemctl(runner, &["daemon-reload"], false)?;
    systemctl(runner, &["enable", "--now", &service], false)?;
    tracing::info!(unit = %unit.display(), "daemon service installed");
    Ok(unit)
}

/// Disable the service and remove the unit. Missing units are not an error.
pub fn uninstall(runner: &dyn CommandRunner, unit_dir: &Path, state_dir: &Path) -> Result<(), DaemonError> {
    let unit = unit_path(unit_dir);
    if unit.exists() {
        let service = format!("{SERVICE_NAME}.service");
        systemctl(runner, &["disable", "--now", &service], true)?;
        fs::remove_file(&unit).map_err(|e| io_err(&unit, e))?;
        systemctl(runner, &["daemon-reload"], true)?;
    }

    let socket = socket_path(state_dir);
    if socket.exists() {
        let _ = fs::remove_file(socket);
    }
    Ok(())
}

fn systemctl(runner: &dyn CommandRunner, args: &[&str], ignore_failure: bool) -> Result<(), DaemonError> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let output = runner
        .run("systemctl", &args)
        .map_err(|e| DaemonError::ServiceUnit(e.to_string()))?;
    if output.success() || ignore_failure {
        return Ok(());
    }
    Err(DaemonError::ServiceUnit(format!(
        "systemctl {} failed: {}",
        args.join(" "),
        output.combined()
    )))
}
