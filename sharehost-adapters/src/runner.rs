//! External command seam.
//!
//! Every package-manager, `systemctl`, `journalctl`, `testparm` and `mc`
//! invocation goes through [`CommandRunner`] so adapters can be exercised
//! against a scripted runner instead of the host.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{io_err, AdapterError};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout and stderr joined, trimmed; used verbatim in error details.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, true) => format!("exit status {:?}", self.status),
            (false, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{out}\n{err}"),
        }
    }
}

/// A long-running child detached from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// stdout and stderr are appended here.
    pub log_file: PathBuf,
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is not an error
    /// here; only failure to execute is.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, AdapterError>;

    /// Start a background process and return its pid.
    fn spawn_background(&self, spec: &SpawnSpec) -> Result<u32, AdapterError>;

    /// `true` when `program` resolves on `PATH`.
    fn program_available(&self, program: &str) -> bool {
        self.run("which", &[program.to_string()])
            .map(|o| o.success())
            .unwrap_or(false)
    }
}

/// Runs commands on the host with `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, AdapterError> {
        tracing::debug!(program, args = ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| AdapterError::Spawn {
                program: program.to_string(),
                source: e,
            })?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_background(&self, spec: &SpawnSpec) -> Result<u32, AdapterError> {
        if let Some(dir) = spec.log_file.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_file)
            .map_err(|e| io_err(&spec.log_file, e))?;
        let log_err = log.try_clone().map_err(|e| io_err(&spec.log_file, e))?;

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| AdapterError::Spawn {
                program: spec.program.display().to_string(),
                source: e,
            })?;
        tracing::info!(program = %spec.program.display(), pid = child.id(), "spawned background process");
        Ok(child.id())
    }
}

/// Scripted runner for unit tests: answers by longest matching command
/// prefix and records every invocation.
#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
        sticky: Mutex<HashMap<String, CommandOutput>>,
        pub(crate) calls: Mutex<Vec<String>>,
        next_pid: Mutex<u32>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self {
                next_pid: Mutex::new(4242),
                ..Self::default()
            }
        }

        /// Queue one response for commands starting with `prefix`.
        pub(crate) fn push(&self, prefix: &str, output: CommandOutput) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .entry(prefix.to_string())
                .or_default()
                .push_back(output);
            self
        }

        /// Answer every command starting with `prefix` with `output` once the
        /// queue for it is empty.
        pub(crate) fn always(&self, prefix: &str, output: CommandOutput) -> &Self {
            self.sticky
                .lock()
                .unwrap()
                .insert(prefix.to_string(), output);
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn called(&self, prefix: &str) -> bool {
            self.calls().iter().any(|c| c.starts_with(prefix))
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, AdapterError> {
            let line = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            let mut responses = self.responses.lock().unwrap();
            let queued = responses
                .iter_mut()
                .filter(|(prefix, queue)| line.starts_with(prefix.as_str()) && !queue.is_empty())
                .max_by_key(|(prefix, _)| prefix.len())
                .and_then(|(_, queue)| queue.pop_front());
            if let Some(out) = queued {
                return Ok(out);
            }
            let sticky = self.sticky.lock().unwrap();
            Ok(sticky
                .iter()
                .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, out)| out.clone())
                .unwrap_or_else(|| CommandOutput::ok("")))
        }

        fn spawn_background(&self, spec: &SpawnSpec) -> Result<u32, AdapterError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("spawn {}", spec.program.display()));
            let mut pid = self.next_pid.lock().unwrap();
            *pid += 1;
            Ok(*pid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedRunner;
    use super::*;

    #[test]
    fn combined_prefers_available_streams() {
        assert_eq!(CommandOutput::ok(" hi \n").combined(), "hi");
        assert_eq!(CommandOutput::failed(1, "boom").combined(), "boom");
        assert!(CommandOutput::failed(3, "").combined().contains("3"));
    }

    #[test]
    fn scripted_runner_uses_longest_prefix() {
        let runner = ScriptedRunner::new();
        runner.always("systemctl", CommandOutput::ok("generic"));
        runner.always("systemctl is-active", CommandOutput::ok("active"));
        let out = runner
            .run("systemctl", &["is-active".into(), "smbd".into()])
            .unwrap();
        assert_eq!(out.stdout, "active");
        assert!(runner.called("systemctl is-active smbd"));
    }

    #[test]
    fn system_runner_reports_missing_program() {
        let err = SystemRunner
            .run("definitely-not-a-real-program-xyz", &[])
            .unwrap_err();
        assert!(matches!(err, AdapterError::Spawn { .. }));
    }
}
