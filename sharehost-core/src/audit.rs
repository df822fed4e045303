//! Append-only audit sink for access log entries and lifecycle events.
//!
//! # Storage layout
//!
//! ```text
//! <state_dir>/audit/
//!   access.jsonl   (one AccessLogEntry per line)
//!   events.jsonl   (one LifecycleEvent per line)
//! ```
//!
//! Recording never fails the caller: write errors are reported through
//! `tracing::warn!` and dropped. Reads are lazy line iterators; paging is left
//! to the consumer (`skip` / `take`).

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::{
    AccessAction, AccessLogEntry, AccessOutcome, LifecycleEvent, ProtocolName, UserId,
};

pub const ACCESS_LOG: &str = "access.jsonl";
pub const EVENT_LOG: &str = "events.jsonl";

/// Filter over access log entries. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFilter {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub protocol: Option<ProtocolName>,
    #[serde(default)]
    pub action: Option<AccessAction>,
    #[serde(default)]
    pub outcome: Option<AccessOutcome>,
    /// Inclusive lower bound.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl AccessFilter {
    pub fn matches(&self, entry: &AccessLogEntry) -> bool {
        if let Some(user) = &self.user_id {
            if entry.user_id.as_ref() != Some(user) {
                return false;
            }
        }
        if let Some(protocol) = &self.protocol {
            if &entry.protocol != protocol {
                return false;
            }
        }
        if self.action.is_some_and(|a| a != entry.action) {
            return false;
        }
        if self.outcome.is_some_and(|o| o != entry.outcome) {
            return false;
        }
        if self.from.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.timestamp > to) {
            return false;
        }
        true
    }
}

/// Totals over the access log (dashboard statistics panel).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSummary {
    pub total: u64,
    pub by_outcome: BTreeMap<String, u64>,
    pub by_action: BTreeMap<String, u64>,
    pub by_protocol: BTreeMap<String, u64>,
}

pub struct AuditRecorder {
    dir: PathBuf,
    // Serializes appends so concurrent lines never interleave.
    write_lock: Mutex<()>,
}

impl AuditRecorder {
    /// Recorder writing under `<state_dir>/audit/`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("audit"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn access_log_path(&self) -> PathBuf {
        self.dir.join(ACCESS_LOG)
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.dir.join(EVENT_LOG)
    }

    pub fn record_access(&self, entry: &AccessLogEntry) {
        if let Err(e) = self.append(&self.access_log_path(), entry) {
            tracing::warn!(error = %e, protocol = %entry.protocol, "dropping access log entry");
        }
    }

    pub fn record_event(&self, event: &LifecycleEvent) {
        if let Err(e) = self.append(&self.event_log_path(), event) {
            tracing::warn!(
                error = %e,
                protocol = %event.protocol,
                operation = %event.operation,
                "dropping lifecycle event"
            );
        }
    }

    /// Lazily iterate access entries matching `filter`, oldest first.
    pub fn query(&self, filter: AccessFilter) -> impl Iterator<Item = AccessLogEntry> {
        read_jsonl::<AccessLogEntry>(self.access_log_path()).filter(move |e| filter.matches(e))
    }

    /// Lazily iterate lifecycle events, optionally for a single protocol.
    pub fn events(&self, protocol: Option<ProtocolName>) -> impl Iterator<Item = LifecycleEvent> {
        read_jsonl::<LifecycleEvent>(self.event_log_path())
            .filter(move |e| protocol.as_ref().map_or(true, |p| &e.protocol == p))
    }

    /// Totals by outcome, action and protocol for entries at or after `since`.
    pub fn summarize(&self, since: Option<DateTime<Utc>>) -> AccessSummary {
        let filter = AccessFilter {
            from: since,
            ..AccessFilter::default()
        };
        let mut summary = AccessSummary::default();
        for entry in self.query(filter) {
            summary.total += 1;
            *summary
                .by_outcome
                .entry(entry.outcome.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_action
                .entry(entry.action.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_protocol
                .entry(entry.protocol.0.clone())
                .or_default() += 1;
        }
        summary
    }

    fn append<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        file.write_all(line.as_bytes()).map_err(|e| io_err(path, e))
    }
}

/// Missing file → empty iterator. Malformed lines are skipped with a warning.
fn read_jsonl<T: DeserializeOwned + 'static>(path: PathBuf) -> Box<dyn Iterator<Item = T>> {
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Box::new(std::iter::empty()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot open audit log");
            return Box::new(std::iter::empty());
        }
    };
    let read_path = path.clone();
    Box::new(
        BufReader::new(file)
            .lines()
            // A line that is not UTF-8 is consumed and skipped; any other
            // read error ends the scan.
            .map_while(move |line| match line {
                Ok(line) => Some(Some(line)),
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::warn!(path = %read_path.display(), error = %e, "skipping undecodable audit line");
                    Some(None)
                }
                Err(e) => {
                    tracing::warn!(path = %read_path.display(), error = %e, "audit log read stopped");
                    None
                }
            })
            .flatten()
            .filter(|line| !line.trim().is_empty())
            .filter_map(move |line| match serde_json::from_str(&line) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed audit line");
                    None
                }
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventOutcome, ProtocolStatus};
    use chrono::Duration;
    use tempfile::TempDir;

    fn entry(protocol: &str, action: AccessAction, outcome: AccessOutcome) -> AccessLogEntry {
        AccessLogEntry {
            user_id: Some(UserId::from("u1")),
            protocol: ProtocolName::from(protocol),
            action,
            file_path: Some("/srv/sharehost/public/a.txt".into()),
            source_addr: "10.0.0.5".into(),
            outcome,
            error: None,
            bytes: Some(42),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn query_on_empty_log_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let audit = AuditRecorder::new(dir.path());
        assert_eq!(audit.query(AccessFilter::default()).count(), 0);
    }

    #[test]
    fn query_filters_and_pages_lazily() {
        let dir = TempDir::new().expect("tempdir");
        let audit = AuditRecorder::new(dir.path());
        for _ in 0..5 {
            audit.record_access(&entry("ftp", AccessAction::Upload, AccessOutcome::Success));
        }
        audit.record_access(&entry("smb", AccessAction::Login, AccessOutcome::Denied));

        let ftp = AccessFilter {
            protocol: Some(ProtocolName::from("ftp")),
            ..AccessFilter::default()
        };
        assert_eq!(audit.query(ftp.clone()).count(), 5);
        assert_eq!(audit.query(ftp).skip(2).take(2).count(), 2);

        let denied = AccessFilter {
            outcome: Some(AccessOutcome::Denied),
            ..AccessFilter::default()
        };
        let hits: Vec<_> = audit.query(denied).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].protocol, ProtocolName::from("smb"));
    }

    #[test]
    fn time_range_filter_is_inclusive() {
        let e = entry("ftp", AccessAction::List, AccessOutcome::Success);
        let filter = AccessFilter {
            from: Some(e.timestamp),
            to: Some(e.timestamp),
            ..AccessFilter::default()
        };
        assert!(filter.matches(&e));
        let later = AccessFilter {
            from: Some(e.timestamp + Duration::seconds(1)),
            ..AccessFilter::default()
        };
        assert!(!later.matches(&e));
    }

    #[test]
    fn summarize_counts_by_dimension() {
        let dir = TempDir::new().expect("tempdir");
        let audit = AuditRecorder::new(dir.path());
        audit.record_access(&entry("ftp", AccessAction::Upload, AccessOutcome::Success));
        audit.record_access(&entry("ftp", AccessAction::Download, AccessOutcome::Success));
        audit.record_access(&entry("sftp", AccessAction::Login, AccessOutcome::Failed));

        let summary = audit.summarize(None);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_outcome.get("success"), Some(&2));
        assert_eq!(summary.by_protocol.get("sftp"), Some(&1));
        assert_eq!(summary.by_action.get("upload"), Some(&1));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let audit = AuditRecorder::new(dir.path());
        audit.record_access(&entry("ftp", AccessAction::Mkdir, AccessOutcome::Success));
        let mut f = OpenOptions::new()
            .append(true)
            .open(audit.access_log_path())
            .unwrap();
        f.write_all(b"{not json\n").unwrap();
        audit.record_access(&entry("ftp", AccessAction::Rmdir, AccessOutcome::Success));
        assert_eq!(audit.query(AccessFilter::default()).count(), 2);
    }

    #[test]
    fn undecodable_lines_do_not_hide_later_entries() {
        let dir = TempDir::new().expect("tempdir");
        let audit = AuditRecorder::new(dir.path());
        audit.record_access(&entry("ftp", AccessAction::Upload, AccessOutcome::Success));
        let mut f = OpenOptions::new()
            .append(true)
            .open(audit.access_log_path())
            .unwrap();
        f.write_all(b"\xff\xfe garbage\n").unwrap();
        audit.record_access(&entry("smb", AccessAction::Download, AccessOutcome::Success));
        audit.record_access(&entry("s3", AccessAction::Delete, AccessOutcome::Denied));

        let protocols: Vec<String> = audit
            .query(AccessFilter::default())
            .map(|e| e.protocol.to_string())
            .collect();
        assert_eq!(protocols.len(), 3);
        assert!(protocols.contains(&"s3".to_string()));
    }

    #[test]
    fn record_never_panics_when_dir_is_unwritable() {
        let dir = TempDir::new().expect("tempdir");
        // A regular file where the audit directory should be.
        std::fs::write(dir.path().join("audit"), b"").unwrap();
        let audit = AuditRecorder::new(dir.path());
        audit.record_event(&LifecycleEvent {
            protocol: ProtocolName::from("ftp"),
            operation: "install".into(),
            outcome: EventOutcome::Success,
            status: ProtocolStatus::Installed,
            detail: None,
            duration_ms: 3,
            timestamp: Utc::now(),
        });
        assert_eq!(audit.events(None).count(), 0);
    }
}
