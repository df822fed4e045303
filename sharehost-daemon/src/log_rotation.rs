//! Size-based rotation for the daemon's own logs and the logs of
//! process-supervised protocol daemons.
//!
//! Writers keep their append-mode descriptors open (systemd `append:`
//! outputs, the MinIO child's stdout), so the live file is copied to
//! `<name>.1` and truncated in place instead of renamed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sharehost_core::Settings;

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated copies kept per log.
pub const MAX_ROTATED_FILES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
            max_files: MAX_ROTATED_FILES,
        }
    }
}

/// Rotate `log_path` once it reaches `policy.max_bytes`.
///
/// `<name>.<n>` shifts to `<name>.<n+1>` (the oldest is dropped), the live
/// content is copied to `<name>.1` and the live file is truncated.
///
/// Returns `true` if rotation occurred. A missing file is not an error.
pub fn rotate_if_needed(log_path: &Path, policy: RotationPolicy) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < policy.max_bytes || policy.max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, policy.max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..policy.max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }

    fs::copy(log_path, numbered_path(log_path, 1))?;
    fs::OpenOptions::new().write(true).open(log_path)?.set_len(0)?;
    Ok(true)
}

/// Every log file the daemon is responsible for rotating.
pub fn managed_logs(state_dir: &Path, settings: &Settings) -> Vec<PathBuf> {
    vec![
        crate::paths::stdout_log_path(state_dir),
        crate::paths::stderr_log_path(state_dir),
        settings.s3.log_file.clone(),
    ]
}

/// Rotate each of `logs`. A failure on one file does not block the others.
pub fn rotate_logs(logs: &[PathBuf], policy: RotationPolicy) {
    for log_path in logs {
        match rotate_if_needed(log_path, policy) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

/// `<base>.<n>`, e.g. `daemon.log.2`.
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("sharehost.log");
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SMALL: RotationPolicy = RotationPolicy {
        max_bytes: 16,
        max_files: 3,
    };

    #[test]
    fn small_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        fs::write(&log, "short").unwrap();
        assert!(!rotate_if_needed(&log, SMALL).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn missing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        assert!(!rotate_if_needed(&dir.path().join("minio.log"), SMALL).unwrap());
    }

    #[test]
    fn open_append_writer_keeps_writing_to_live_file() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("minio.log");
        let mut writer = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log)
            .unwrap();
        writer.write_all(b"0123456789abcdefXYZ").unwrap();

        assert!(rotate_if_needed(&log, SMALL).unwrap());
        assert_eq!(fs::read_to_string(numbered_path(&log, 1)).unwrap(), "0123456789abcdefXYZ");

        writer.write_all(b"after").unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "after");
    }

    #[test]
    fn rotated_copies_are_capped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        for round in 0..5u8 {
            fs::write(&log, vec![b'a' + round; 32]).unwrap();
            rotate_if_needed(&log, SMALL).unwrap();
        }
        for n in 1..=SMALL.max_files {
            assert!(numbered_path(&log, n).exists(), "copy .{n} should exist");
        }
        assert!(!numbered_path(&log, SMALL.max_files + 1).exists());
        // Newest copy holds the last round's content.
        assert_eq!(fs::read(numbered_path(&log, 1)).unwrap(), vec![b'e'; 32]);
    }

    #[test]
    fn managed_logs_include_the_object_store_log() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::default();
        let logs = managed_logs(dir.path(), &settings);
        assert_eq!(logs.len(), 3);
        assert!(logs.contains(&settings.s3.log_file));
    }
}
