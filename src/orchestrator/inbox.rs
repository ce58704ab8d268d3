//! File-drop entry point: one `TaskSubmission` JSON document per file under `state/inbox/`.

use crate::errors::{CoordError, CoordResult};
use crate::pipeline::{PipelineRouter, SubmitReceipt, TaskSubmission};
use crate::store::RecordStore;
use crate::util::sanitize_component;
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxSummary {
    pub submitted: Vec<SubmitReceipt>,
    /// Files left for a later tick because the entry queue was full.
    pub deferred: Vec<PathBuf>,
    pub rejected: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Inbox {
    store: RecordStore,
}

impl Inbox {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Queue a submission for the next tick of a running loop.
    pub fn drop_submission(&self, submission: &TaskSubmission) -> CoordResult<PathBuf> {
        if submission.task_id.trim().is_empty() {
            return Err(CoordError::MissingArgs("Task id required".to_string()));
        }
        let path = self
            .store
            .layout()
            .inbox_dir()
            .join(format!("{}.json", sanitize_component(&submission.task_id)));
        self.store.write(&path, submission)?;
        Ok(path)
    }

    /// Pending submission files, oldest name first.
    pub fn pending(&self) -> CoordResult<Vec<PathBuf>> {
        let dir = self.store.layout().inbox_dir();
        let pattern = format!("{}/*.json", glob::Pattern::escape(&dir.to_string_lossy()));
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .context("Invalid inbox pattern")?
            .filter_map(|entry| entry.ok())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Submit every pending file through `router`.
    pub fn drain(&self, router: &PipelineRouter) -> CoordResult<InboxSummary> {
        let mut summary = InboxSummary::default();
        for path in self.pending()? {
            let submission: TaskSubmission = match self.store.read_optional(&path) {
                Ok(Some(submission)) => submission,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "malformed inbox file");
                    self.reject(&path)?;
                    summary.rejected.push(path);
                    continue;
                }
            };

            match router.submit(submission) {
                Ok(receipt) => {
                    self.store.remove(&path)?;
                    summary.submitted.push(receipt);
                }
                Err(CoordError::QueueFull { role, .. }) => {
                    tracing::debug!(path = %path.display(), %role, "entry queue full, deferring");
                    summary.deferred.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "inbox submission refused");
                    self.reject(&path)?;
                    summary.rejected.push(path);
                }
            }
        }
        Ok(summary)
    }

    fn reject(&self, path: &Path) -> CoordResult<()> {
        let target = path.with_extension("json.rejected");
        std::fs::rename(path, &target)
            .with_context(|| format!("Failed to set aside {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwitchyardToml;
    use crate::queue::QueueManager;
    use crate::worker::WorkerRole;
    use tempfile::tempdir;

    fn setup(max_queue: usize) -> (Inbox, PipelineRouter, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.layout().init().unwrap();
        let queues = QueueManager::new(store.clone(), max_queue, 1000);
        let workflows = crate::pipeline::WorkflowSet::new(SwitchyardToml::default().workflows);
        let router = PipelineRouter::new(store.clone(), workflows, queues);
        (Inbox::new(store), router, dir)
    }

    fn submission(task_id: &str) -> TaskSubmission {
        TaskSubmission {
            task_id: task_id.to_string(),
            title: format!("Task {}", task_id),
            project_id: None,
            priority: 0,
            workflow: None,
            plan_path: None,
        }
    }

    #[test]
    fn test_drain_submits_and_removes_files() {
        let (inbox, router, _dir) = setup(3);
        let path = inbox.drop_submission(&submission("T-1")).unwrap();
        assert!(path.exists());

        let summary = inbox.drain(&router).unwrap();
        assert_eq!(summary.submitted.len(), 1);
        assert!(!path.exists());
        assert_eq!(router.queues().len(WorkerRole::Backend), 1);
    }

    #[test]
    fn test_full_queue_defers() {
        let (inbox, router, _dir) = setup(1);
        inbox.drop_submission(&submission("T-1")).unwrap();
        inbox.drop_submission(&submission("T-2")).unwrap();

        let summary = inbox.drain(&router).unwrap();
        assert_eq!(summary.submitted.len(), 1);
        assert_eq!(summary.deferred.len(), 1);
        assert_eq!(inbox.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_file_is_set_aside() {
        let (inbox, router, dir) = setup(3);
        let inbox_dir = dir.path().join(".switchyard/state/inbox");
        std::fs::create_dir_all(&inbox_dir).unwrap();
        std::fs::write(inbox_dir.join("bad.json"), "{ not json").unwrap();

        let summary = inbox.drain(&router).unwrap();
        assert_eq!(summary.rejected.len(), 1);
        assert!(inbox.pending().unwrap().is_empty());
        assert!(inbox_dir.join("bad.json.rejected").exists());
    }

    #[test]
    fn test_drop_requires_task_id() {
        let (inbox, _router, _dir) = setup(3);
        assert!(matches!(
            inbox.drop_submission(&submission(" ")).unwrap_err(),
            CoordError::MissingArgs(_)
        ));
    }
}
