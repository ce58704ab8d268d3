//! Per-task progress records.
//!
//! The orchestrator creates a record when it dispatches a task to a worker; the worker
//! (or an operator) reports status and results into it. A `COMPLETE` record is what the
//! orchestrator turns into a stage result on its next tick.

use crate::errors::{CoordError, CoordResult};
use crate::pipeline::StageResult;
use crate::store::RecordStore;
use crate::util::sanitize_component;
use crate::worker::WorkerRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    InProgress,
    Complete,
    Blocked,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::InProgress => write!(f, "IN_PROGRESS"),
            TaskStatus::Complete => write!(f, "COMPLETE"),
            TaskStatus::Blocked => write!(f, "BLOCKED"),
            TaskStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETE" | "COMPLETED" => Ok(TaskStatus::Complete),
            "BLOCKED" => Ok(TaskStatus::Blocked),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(CoordError::InvalidArgs(format!(
                "Invalid status '{}'. Valid values: in_progress, complete, blocked, failed",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub task_id: String,
    pub role: WorkerRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default)]
    pub title: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub log: Vec<LogLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ProgressRecord {
    /// The stage result this record describes.
    pub fn stage_result(&self) -> StageResult {
        StageResult {
            status: Some(self.status),
            confidence: self.confidence,
            summary: self.summary.clone(),
            files_changed: self.files_changed.clone(),
            learnings: self.learnings.clone(),
            blockers: self.blockers.clone(),
            recommendations: self.recommendations.clone(),
        }
    }
}

/// Fields a worker reports. Empty lists leave the recorded lists unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProgressReport {
    pub status: Option<TaskStatus>,
    pub message: Option<String>,
    pub confidence: Option<f64>,
    pub summary: Option<String>,
    pub files_changed: Vec<String>,
    pub learnings: Vec<String>,
    pub blockers: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    store: RecordStore,
}

impl ProgressTracker {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.store
            .layout()
            .progress_dir()
            .join(format!("{}.json", sanitize_component(task_id)))
    }

    /// Start a fresh record for `task_id` at `role`, replacing any previous stage's record.
    pub fn create(
        &self,
        task_id: &str,
        role: WorkerRole,
        title: &str,
        workflow: Option<&str>,
    ) -> CoordResult<ProgressRecord> {
        let now = Utc::now();
        let record = ProgressRecord {
            task_id: task_id.to_string(),
            role,
            workflow: workflow.map(str::to_string),
            title: title.to_string(),
            status: TaskStatus::InProgress,
            started_at: now,
            updated_at: now,
            log: vec![LogLine {
                timestamp: now,
                message: format!("Dispatched to {}", role),
            }],
            confidence: None,
            summary: None,
            files_changed: Vec::new(),
            learnings: Vec::new(),
            blockers: Vec::new(),
            recommendations: Vec::new(),
        };
        self.store.write(&self.path_for(task_id), &record)?;
        Ok(record)
    }

    pub fn read(&self, task_id: &str) -> CoordResult<Option<ProgressRecord>> {
        Ok(self.store.read_optional(&self.path_for(task_id))?)
    }

    pub fn report(&self, task_id: &str, report: ProgressReport) -> CoordResult<ProgressRecord> {
        StageResult::check_confidence(report.confidence)?;

        let _guard = self.store.exclusive()?;
        let mut record = self.read(task_id)?.ok_or_else(|| {
            CoordError::InvalidArgs(format!("No progress record for task '{}'", task_id))
        })?;

        let now = Utc::now();
        if let Some(status) = report.status {
            if status != record.status {
                record.log.push(LogLine {
                    timestamp: now,
                    message: format!("Status {} -> {}", record.status, status),
                });
            }
            record.status = status;
        }
        if let Some(message) = report.message {
            record.log.push(LogLine {
                timestamp: now,
                message,
            });
        }
        if report.confidence.is_some() {
            record.confidence = report.confidence;
        }
        if report.summary.is_some() {
            record.summary = report.summary;
        }
        for (target, incoming) in [
            (&mut record.files_changed, report.files_changed),
            (&mut record.learnings, report.learnings),
            (&mut record.blockers, report.blockers),
            (&mut record.recommendations, report.recommendations),
        ] {
            if !incoming.is_empty() {
                *target = incoming;
            }
        }
        record.updated_at = now;

        self.store.write(&self.path_for(task_id), &record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tempfile::tempdir;

    fn make_tracker() -> (ProgressTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.layout().init().unwrap();
        (ProgressTracker::new(store), dir)
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(TaskStatus::from_str("complete").unwrap(), TaskStatus::Complete);
        assert_eq!(
            TaskStatus::from_str("in-progress").unwrap(),
            TaskStatus::InProgress
        );
        assert!(TaskStatus::from_str("done-ish").is_err());
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }

    #[test]
    fn test_create_then_read() {
        let (tracker, _dir) = make_tracker();
        tracker
            .create("T-1", WorkerRole::Backend, "Add login", Some("default"))
            .unwrap();
        let record = tracker.read("T-1").unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::InProgress);
        assert_eq!(record.role, WorkerRole::Backend);
        assert_eq!(record.log.len(), 1);
        assert!(tracker.read("T-404").unwrap().is_none());
    }

    #[test]
    fn test_report_updates_fields() {
        let (tracker, _dir) = make_tracker();
        tracker
            .create("T-1", WorkerRole::Review, "", None)
            .unwrap();
        let record = tracker
            .report(
                "T-1",
                ProgressReport {
                    status: Some(TaskStatus::Complete),
                    confidence: Some(0.9),
                    summary: Some("Looks good".into()),
                    files_changed: vec!["src/lib.rs".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(record.status, TaskStatus::Complete);
        assert_eq!(record.log.len(), 2);

        let result = record.stage_result();
        assert_eq!(result.confidence, Some(0.9));
        assert_eq!(result.files_changed, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn test_report_without_record_fails() {
        let (tracker, _dir) = make_tracker();
        let err = tracker
            .report("ghost", ProgressReport::default())
            .unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::InvalidArgs);
    }

    #[test]
    fn test_report_rejects_out_of_range_confidence() {
        let (tracker, _dir) = make_tracker();
        tracker.create("T-1", WorkerRole::Review, "", None).unwrap();
        let err = tracker
            .report(
                "T-1",
                ProgressReport {
                    confidence: Some(1.2),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidArgs(_)));
    }
}
