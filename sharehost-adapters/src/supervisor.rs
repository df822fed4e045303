//! Service supervisor: wraps `systemctl` / `journalctl`.
//!
//! `start` and `restart` return only once the unit is confirmed active, polling
//! `systemctl is-active` every `poll_interval` until `start_timeout`. A unit
//! that falls to `failed`/`inactive` is [`AdapterError::StartFailed`]; one still
//! `activating` at the deadline is [`AdapterError::StartTimeout`].

use std::sync::Arc;
use std::time::Instant;

use sharehost_core::config::SupervisorSettings;

use crate::error::AdapterError;
use crate::runner::CommandRunner;

/// Lines of journal attached to a start failure.
const FAILURE_LOG_LINES: usize = 20;

/// State reported by `systemctl is-active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Active,
    Reloading,
    Activating,
    Deactivating,
    Inactive,
    Failed,
    Unknown(String),
}

impl UnitState {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "active" => UnitState::Active,
            "reloading" => UnitState::Reloading,
            "activating" => UnitState::Activating,
            "deactivating" => UnitState::Deactivating,
            "inactive" => UnitState::Inactive,
            "failed" => UnitState::Failed,
            other => UnitState::Unknown(other.to_string()),
        }
    }
}

/// OS service manager operations used by the adapters.
pub trait ServiceManager: Send + Sync {
    fn enable(&self, unit: &str) -> Result<(), AdapterError>;
    fn disable(&self, unit: &str) -> Result<(), AdapterError>;
    /// Start and confirm the unit is active.
    fn start(&self, unit: &str) -> Result<(), AdapterError>;
    fn stop(&self, unit: &str) -> Result<(), AdapterError>;
    /// Restart and confirm the unit is active.
    fn restart(&self, unit: &str) -> Result<(), AdapterError>;
    /// Re-read configuration without dropping sessions where supported.
    fn reload(&self, unit: &str) -> Result<(), AdapterError>;
    fn is_active(&self, unit: &str) -> Result<bool, AdapterError>;
    fn tail_logs(&self, unit: &str, lines: usize) -> Result<Vec<String>, AdapterError>;
}

/// systemd-backed [`ServiceManager`].
pub struct Systemd {
    runner: Arc<dyn CommandRunner>,
    timing: SupervisorSettings,
}

impl Systemd {
    pub fn new(runner: Arc<dyn CommandRunner>, timing: SupervisorSettings) -> Self {
        Self { runner, timing }
    }

    fn systemctl(&self, action: &'static str, unit: &str) -> Result<(), AdapterError> {
        let out = self
            .runner
            .run("systemctl", &[action.to_string(), unit.to_string()])?;
        if out.success() {
            return Ok(());
        }
        Err(AdapterError::ServiceCommand {
            action,
            unit: unit.to_string(),
            detail: out.combined(),
        })
    }

    pub fn state(&self, unit: &str) -> Result<UnitState, AdapterError> {
        // is-active exits non-zero for every state but active; stdout carries the state.
        let out = self
            .runner
            .run("systemctl", &["is-active".to_string(), unit.to_string()])?;
        Ok(UnitState::parse(&out.stdout))
    }

    /// Main pid of a running unit, if any.
    pub fn main_pid(&self, unit: &str) -> Option<u32> {
        let out = self
            .runner
            .run(
                "systemctl",
                &["show".into(), "-p".into(), "MainPID".into(), unit.to_string()],
            )
            .ok()?;
        out.stdout
            .trim()
            .rsplit('=')
            .next()
            .and_then(|pid| pid.parse::<u32>().ok())
            .filter(|pid| *pid != 0)
    }

    fn wait_active(&self, unit: &str) -> Result<(), AdapterError> {
        let deadline = Instant::now() + self.timing.start_timeout();
        loop {
            match self.state(unit)? {
                UnitState::Active => return Ok(()),
                UnitState::Failed | UnitState::Inactive => {
                    let logs = self.tail_logs(unit, FAILURE_LOG_LINES).unwrap_or_default();
                    return Err(AdapterError::StartFailed {
                        unit: unit.to_string(),
                        detail: if logs.is_empty() {
                            "unit exited".to_string()
                        } else {
                            logs.join("\n")
                        },
                    });
                }
                state => {
                    if Instant::now() >= deadline {
                        tracing::warn!(unit, ?state, "start deadline passed");
                        return Err(AdapterError::StartTimeout {
                            unit: unit.to_string(),
                            timeout_ms: self.timing.start_timeout_ms,
                        });
                    }
                }
            }
            std::thread::sleep(self.timing.poll_interval());
        }
    }

    fn start_like(&self, action: &'static str, unit: &str) -> Result<(), AdapterError> {
        let out = self
            .runner
            .run("systemctl", &[action.to_string(), unit.to_string()])?;
        if !out.success() {
            return Err(AdapterError::StartFailed {
                unit: unit.to_string(),
                detail: out.combined(),
            });
        }
        self.wait_active(unit)
    }
}

impl ServiceManager for Systemd {
    fn enable(&self, unit: &str) -> Result<(), AdapterError> {
        self.systemctl("enable", unit)
    }

    fn disable(&self, unit: &str) -> Result<(), AdapterError> {
        self.systemctl("disable", unit)
    }

    fn start(&self, unit: &str) -> Result<(), AdapterError> {
        tracing::info!(unit, "starting unit");
        self.start_like("start", unit)
    }

    fn stop(&self, unit: &str) -> Result<(), AdapterError> {
        tracing::info!(unit, "stopping unit");
        self.systemctl("stop", unit)
    }

    fn restart(&self, unit: &str) -> Result<(), AdapterError> {
        tracing::info!(unit, "restarting unit");
        self.start_like("restart", unit)
    }

    fn reload(&self, unit: &str) -> Result<(), AdapterError> {
        tracing::info!(unit, "reloading unit");
        self.systemctl("reload-or-restart", unit)
    }

    fn is_active(&self, unit: &str) -> Result<bool, AdapterError> {
        Ok(self.state(unit)? == UnitState::Active)
    }

    fn tail_logs(&self, unit: &str, lines: usize) -> Result<Vec<String>, AdapterError> {
        let out = self.runner.run(
            "journalctl",
            &[
                "-u".into(),
                unit.to_string(),
                "-n".into(),
                lines.to_string(),
                "--no-pager".into(),
                "-o".into(),
                "short-iso".into(),
            ],
        )?;
        if !out.success() {
            return Err(AdapterError::ServiceCommand {
                action: "journalctl",
                unit: unit.to_string(),
                detail: out.combined(),
            });
        }
        Ok(out.stdout.lines().map(str::to_string).collect())
    }
}
