//! Handoff records: the write-once outcome of one stage, addressed to the next.
//!
//! Each handoff is stored as `HANDOFF_<task>_<from>_to_<to>.json` in the progress
//! directory, with a Markdown rendition beside it for the receiving worker to read.

use crate::errors::{CoordError, CoordResult};
use crate::progress::TaskStatus;
use crate::store::RecordStore;
use crate::util::sanitize_component;
use crate::worker::WorkerRole;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Confidence recorded when a stage reports none.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

/// What a stage produced, as reported by its worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
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

impl StageResult {
    /// Confidence scores live in `[0, 1]`.
    pub fn check_confidence(confidence: Option<f64>) -> CoordResult<()> {
        match confidence {
            Some(c) if !(0.0..=1.0).contains(&c) => Err(CoordError::InvalidArgs(format!(
                "Confidence {} is outside [0, 1]",
                c
            ))),
            _ => Ok(()),
        }
    }

    pub fn validate(&self) -> CoordResult<()> {
        Self::check_confidence(self.confidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandoffStatus {
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub task_id: String,
    pub from: WorkerRole,
    pub to: WorkerRole,
    pub workflow: String,
    pub status: HandoffStatus,
    pub confidence: f64,
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Handoff {
    pub fn from_result(
        task_id: &str,
        workflow: &str,
        from: WorkerRole,
        to: WorkerRole,
        result: &StageResult,
    ) -> Self {
        let status = match result.status {
            Some(TaskStatus::Failed) => HandoffStatus::Failed,
            _ => HandoffStatus::Complete,
        };
        Self {
            task_id: task_id.to_string(),
            from,
            to,
            workflow: workflow.to_string(),
            status,
            confidence: result.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            summary: result
                .summary
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| format!("Completed by {}", from)),
            files_changed: result.files_changed.clone(),
            learnings: result.learnings.clone(),
            blockers: result.blockers.clone(),
            recommendations: result.recommendations.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn to_markdown(&self) -> String {
        fn bullets(out: &mut String, items: &[String], empty: &str) {
            if items.is_empty() {
                let _ = writeln!(out, "{}", empty);
            }
            for item in items {
                let _ = writeln!(out, "- {}", item);
            }
        }

        let mut out = String::new();
        let _ = writeln!(
            out,
            "# Handoff: {} ({} -> {})\n",
            self.task_id, self.from, self.to
        );
        let status = match self.status {
            HandoffStatus::Complete => "COMPLETE",
            HandoffStatus::Failed => "FAILED",
        };
        let _ = writeln!(out, "- **Status:** {}", status);
        let _ = writeln!(out, "- **Confidence:** {:.2}", self.confidence);
        let _ = writeln!(out, "- **Workflow:** {}", self.workflow);
        let _ = writeln!(out, "- **Created:** {}\n", self.created_at.to_rfc3339());

        let _ = writeln!(out, "## Summary\n\n{}\n", self.summary);
        let _ = writeln!(out, "## Files Changed\n");
        bullets(&mut out, &self.files_changed, "_No files recorded_");
        let _ = writeln!(out, "\n## Learnings\n");
        bullets(&mut out, &self.learnings, "_None_");
        let _ = writeln!(out, "\n## Blockers\n");
        bullets(&mut out, &self.blockers, "None");
        let _ = writeln!(out, "\n## Recommendations for {}\n", self.to);
        bullets(&mut out, &self.recommendations, "_None_");
        out
    }
}

/// Result of persisting a handoff.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredHandoff {
    pub path: PathBuf,
    pub markdown_path: PathBuf,
    /// False when an earlier record for the same transition was kept
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct HandoffStore {
    store: RecordStore,
}

impl HandoffStore {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    fn stem(task_id: &str, from: WorkerRole, to: WorkerRole) -> String {
        format!("HANDOFF_{}_{}_to_{}", sanitize_component(task_id), from, to)
    }

    pub fn path_for(&self, task_id: &str, from: WorkerRole, to: WorkerRole) -> PathBuf {
        self.store
            .layout()
            .progress_dir()
            .join(format!("{}.json", Self::stem(task_id, from, to)))
    }

    /// Persist `handoff` unless a record for the same transition already exists.
    pub fn write_once(&self, handoff: &Handoff) -> CoordResult<StoredHandoff> {
        let path = self.path_for(&handoff.task_id, handoff.from, handoff.to);
        let markdown_path = path.with_extension("md");
        if path.exists() {
            tracing::debug!(path = %path.display(), "handoff already recorded");
            return Ok(StoredHandoff {
                path,
                markdown_path,
                created: false,
            });
        }

        self.store.write(&path, handoff)?;
        self.store
            .write_text(&markdown_path, &handoff.to_markdown())?;
        Ok(StoredHandoff {
            path,
            markdown_path,
            created: true,
        })
    }

    pub fn read(
        &self,
        task_id: &str,
        from: WorkerRole,
        to: WorkerRole,
    ) -> CoordResult<Option<Handoff>> {
        Ok(self
            .store
            .read_optional(&self.path_for(task_id, from, to))?)
    }

    /// JSON records of every handoff recorded for `task_id`, with their parsed contents.
    pub fn entries(&self, task_id: &str) -> CoordResult<Vec<(PathBuf, Handoff)>> {
        let dir = self.store.layout().progress_dir();
        let pattern = format!(
            "{}/HANDOFF_{}_*.json",
            glob::Pattern::escape(&dir.to_string_lossy()),
            sanitize_component(task_id)
        );

        let mut entries = Vec::new();
        for entry in glob::glob(&pattern).context("Invalid handoff pattern")? {
            let Ok(path) = entry else { continue };
            match self.store.read_optional::<Handoff>(&path) {
                Ok(Some(handoff)) if handoff.task_id == task_id => entries.push((path, handoff)),
                Ok(_) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable handoff"),
            }
        }
        Ok(entries)
    }

    /// Every handoff recorded for `task_id`, oldest first.
    pub fn list(&self, task_id: &str) -> CoordResult<Vec<Handoff>> {
        let mut handoffs: Vec<Handoff> = self
            .entries(task_id)?
            .into_iter()
            .map(|(_, handoff)| handoff)
            .collect();
        handoffs.sort_by_key(|h| h.created_at);
        Ok(handoffs)
    }
}
