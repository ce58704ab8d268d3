use super::{AuditEntry, AuditEvent};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AuditLogger {
    log_file: PathBuf,
}

impl AuditLogger {
    pub fn new(log_file: &Path) -> Self {
        Self {
            log_file: log_file.to_path_buf(),
        }
    }

    /// Append one entry as a single JSON line.
    pub fn record(&self, event: AuditEvent, session_id: &str, data: Value) -> Result<()> {
        let entry = AuditEntry::new(event, session_id, data);
        let mut line = serde_json::to_string(&entry).context("Failed to serialize audit entry")?;
        line.push('\n');

        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent).context("Failed to create audit log directory")?;
        }

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .context("Failed to open audit log")?
            .write_all(line.as_bytes())
            .context("Failed to write audit entry")?;

        Ok(())
    }

    /// Best-effort variant for callers whose primary write already succeeded.
    pub fn record_quietly(&self, event: AuditEvent, session_id: &str, data: Value) {
        if let Err(e) = self.record(event, session_id, data) {
            tracing::warn!(error = %e, ?event, "failed to append audit entry");
        }
    }

    /// All parseable entries, oldest first. Malformed lines are skipped.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        if !self.log_file.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.log_file).context("Failed to read audit log")?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// The most recent `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let entries = self.entries()?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup_logger() -> (AuditLogger, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let logger = AuditLogger::new(&dir.path().join("state").join("audit.log"));
        (logger, dir)
    }

    #[test]
    fn test_empty_log_has_no_entries() {
        let (logger, _dir) = setup_logger();
        assert!(logger.entries().unwrap().is_empty());
    }

    #[test]
    fn test_record_appends_lines() {
        let (logger, _dir) = setup_logger();
        logger
            .record(AuditEvent::SessionCreated, "SESS-1", json!({ "action": "create" }))
            .unwrap();
        logger
            .record(AuditEvent::LockClaimed, "SESS-1", json!({ "lockId": "LOCK-1" }))
            .unwrap();

        let entries = logger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, AuditEvent::SessionCreated);
        assert_eq!(entries[1].data["lockId"], "LOCK-1");
        assert_eq!(entries[1].session_id, "SESS-1");
    }

    #[test]
    fn test_entries_use_camel_case_keys() {
        let (logger, dir) = setup_logger();
        logger
            .record(AuditEvent::Cleanup, "SYSTEM", json!({}))
            .unwrap();
        let raw = std::fs::read_to_string(dir.path().join("state/audit.log")).unwrap();
        assert!(raw.contains("\"sessionId\":\"SYSTEM\""));
        assert!(raw.contains("\"event\":\"cleanup\""));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (logger, dir) = setup_logger();
        logger
            .record(AuditEvent::TaskSubmitted, "SYSTEM", json!({}))
            .unwrap();
        let path = dir.path().join("state/audit.log");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("garbage line\n");
        std::fs::write(&path, raw).unwrap();
        assert_eq!(logger.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_tail_returns_most_recent() {
        let (logger, _dir) = setup_logger();
        for i in 0..5 {
            logger
                .record(AuditEvent::LockHeartbeat, "SESS-1", json!({ "n": i }))
                .unwrap();
        }
        let tail = logger.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].data["n"], 3);
        assert_eq!(tail[1].data["n"], 4);
    }
}
