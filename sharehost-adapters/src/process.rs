//! Pid-file supervisor for daemons that are not service units (MinIO).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use sharehost_core::config::SupervisorSettings;

use crate::error::{io_err, AdapterError};
use crate::probe::HealthCheck;
use crate::runner::{CommandRunner, SpawnSpec};
use crate::supervisor::ServiceManager;

/// How to launch and find the supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// `KEY=VALUE` lines exported to the child.
    pub env_file: Option<PathBuf>,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    /// The process counts as started once this port accepts connections.
    pub ready_port: u16,
}

pub struct ProcessSupervisor {
    spec: ProcessSpec,
    runner: Arc<dyn CommandRunner>,
    health: Arc<dyn HealthCheck>,
    timing: SupervisorSettings,
}

impl ProcessSupervisor {
    pub fn new(
        spec: ProcessSpec,
        runner: Arc<dyn CommandRunner>,
        health: Arc<dyn HealthCheck>,
        timing: SupervisorSettings,
    ) -> Self {
        Self {
            spec,
            runner,
            health,
            timing,
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Pid recorded in the pid file, if any.
    pub fn recorded_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.spec.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn alive(&self, pid: u32) -> bool {
        self.runner
            .run("kill", &["-0".to_string(), pid.to_string()])
            .map(|o| o.success())
            .unwrap_or(false)
    }

    fn running_pid(&self) -> Option<u32> {
        self.recorded_pid().filter(|pid| self.alive(*pid))
    }

    fn write_pid(&self, pid: u32) -> Result<(), AdapterError> {
        let path = &self.spec.pid_file;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        fs::write(path, format!("{pid}\n")).map_err(|e| io_err(path, e))
    }

    fn clear_pid(&self) {
        let _ = fs::remove_file(&self.spec.pid_file);
    }

    fn wait_ready(&self, unit: &str, pid: u32) -> Result<(), AdapterError> {
        let deadline = Instant::now() + self.timing.start_timeout();
        loop {
            if !self.alive(pid) {
                self.clear_pid();
                let logs = self.tail_logs(unit, 20).unwrap_or_default();
                return Err(AdapterError::StartFailed {
                    unit: unit.to_string(),
                    detail: if logs.is_empty() {
                        format!("process {pid} exited")
                    } else {
                        logs.join("\n")
                    },
                });
            }
            if self.health.is_serving(self.spec.ready_port) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::StartTimeout {
                    unit: unit.to_string(),
                    timeout_ms: self.timing.start_timeout_ms,
                });
            }
            std::thread::sleep(self.timing.poll_interval());
        }
    }
}

impl ServiceManager for ProcessSupervisor {
    fn enable(&self, _unit: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    fn disable(&self, _unit: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    fn start(&self, unit: &str) -> Result<(), AdapterError> {
        if let Some(pid) = self.running_pid() {
            tracing::debug!(unit, pid, "process already running");
            return Ok(());
        }
        let env = match &self.spec.env_file {
            Some(path) => read_env_file(path)?,
            None => Vec::new(),
        };
        let pid = self.runner.spawn_background(&SpawnSpec {
            program: self.spec.program.clone(),
            args: self.spec.args.clone(),
            env,
            log_file: self.spec.log_file.clone(),
        })?;
        self.write_pid(pid)?;
        tracing::info!(unit, pid, "started supervised process");
        self.wait_ready(unit, pid)
    }

    fn stop(&self, unit: &str) -> Result<(), AdapterError> {
        let Some(pid) = self.running_pid() else {
            self.clear_pid();
            return Ok(());
        };
        let out = self
            .runner
            .run("kill", &["-TERM".to_string(), pid.to_string()])?;
        if !out.success() {
            return Err(AdapterError::ServiceCommand {
                action: "kill",
                unit: unit.to_string(),
                detail: out.combined(),
            });
        }
        let deadline = Instant::now() + self.timing.start_timeout();
        while self.alive(pid) && Instant::now() < deadline {
            std::thread::sleep(self.timing.poll_interval());
        }
        self.clear_pid();
        tracing::info!(unit, pid, "stopped supervised process");
        Ok(())
    }

    fn restart(&self, unit: &str) -> Result<(), AdapterError> {
        self.stop(unit)?;
        self.start(unit)
    }

    fn reload(&self, unit: &str) -> Result<(), AdapterError> {
        // MinIO has no config file to re-read; policy changes go through `mc`.
        tracing::debug!(unit, "reload is a no-op for supervised processes");
        Ok(())
    }

    fn is_active(&self, _unit: &str) -> Result<bool, AdapterError> {
        Ok(self.running_pid().is_some())
    }

    fn tail_logs(&self, _unit: &str, lines: usize) -> Result<Vec<String>, AdapterError> {
        let path = &self.spec.log_file;
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(path, e)),
        };
        let all: Vec<&str> = contents.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].iter().map(|l| l.to_string()).collect())
    }
}

/// Parse `KEY=VALUE` lines, skipping blanks and `#` comments.
pub fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, AdapterError> {
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::scripted::ScriptedRunner;
    use crate::runner::CommandOutput;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct Flag(AtomicBool);

    impl HealthCheck for Flag {
        fn is_serving(&self, _port: u16) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn supervisor(dir: &Path, runner: Arc<ScriptedRunner>, serving: bool) -> ProcessSupervisor {
        let env = dir.join("minio.env");
        fs::write(&env, "# creds\nMINIO_ROOT_USER=admin\nMINIO_ROOT_PASSWORD=\"s3cret\"\n").unwrap();
        ProcessSupervisor::new(
            ProcessSpec {
                program: PathBuf::from("/usr/local/bin/minio"),
                args: vec!["server".into(), "/data".into()],
                env_file: Some(env),
                pid_file: dir.join("run").join("minio.pid"),
                log_file: dir.join("minio.log"),
                ready_port: 9000,
            },
            runner,
            Arc::new(Flag(AtomicBool::new(serving))),
            SupervisorSettings {
                start_timeout_ms: 20,
                poll_interval_ms: 1,
            },
        )
    }

    #[test]
    fn start_records_pid_once_ready() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let sup = supervisor(tmp.path(), runner.clone(), true);
        // No pid file yet, so kill -0 is only called on the fresh pid.
        sup.start("minio").unwrap();
        assert_eq!(sup.recorded_pid(), Some(4243));
        assert!(runner.called("spawn /usr/local/bin/minio"));
        assert!(sup.is_active("minio").unwrap());
    }

    #[test]
    fn process_that_dies_is_start_failed() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.always("kill -0", CommandOutput::failed(1, "No such process"));
        fs::write(tmp.path().join("minio.log"), "FATAL unable to bind\n").unwrap();
        let sup = supervisor(tmp.path(), runner, true);
        let err = sup.start("minio").unwrap_err();
        assert_eq!(err.kind(), "StartFailed");
        assert!(err.to_string().contains("unable to bind"));
        assert_eq!(sup.recorded_pid(), None);
    }

    #[test]
    fn process_never_listening_is_start_timeout() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let sup = supervisor(tmp.path(), runner, false);
        let err = sup.start("minio").unwrap_err();
        assert_eq!(err.kind(), "StartTimeout");
    }

    #[test]
    fn stop_without_pid_is_noop() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let sup = supervisor(tmp.path(), runner.clone(), true);
        sup.stop("minio").unwrap();
        assert!(!runner.called("kill -TERM"));
    }

    #[test]
    fn stop_terminates_recorded_process() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let sup = supervisor(tmp.path(), runner.clone(), true);
        sup.start("minio").unwrap();
        // Alive for the stop lookup, gone afterwards.
        runner.push("kill -0", CommandOutput::ok(""));
        runner.always("kill -0", CommandOutput::failed(1, ""));
        sup.stop("minio").unwrap();
        assert!(runner.called("kill -TERM 4243"));
        assert_eq!(sup.recorded_pid(), None);
    }

    #[test]
    fn env_file_parsing_skips_comments_and_unquotes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("e.env");
        fs::write(&path, "# c\n\nA=1\nB=\"two\"\nnoequals\n").unwrap();
        let env = read_env_file(&path).unwrap();
        assert_eq!(
            env,
            vec![("A".into(), "1".into()), ("B".into(), "two".into())]
        );
    }

    #[test]
    fn tail_logs_returns_last_lines() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let sup = supervisor(tmp.path(), runner, true);
        fs::write(tmp.path().join("minio.log"), "a\nb\nc\n").unwrap();
        assert_eq!(sup.tail_logs("minio", 2).unwrap(), vec!["b", "c"]);
    }
}
