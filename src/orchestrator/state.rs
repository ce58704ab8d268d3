use crate::errors::CoordResult;
use crate::store::RecordStore;
use crate::worker::WorkerRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    InProgress,
    /// Waiting on a human: low review confidence or a worker-reported block.
    Blocked,
    Failed,
}

/// A task currently assigned to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTask {
    pub task_id: String,
    pub role: WorkerRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub priority: i32,
    pub started_at: DateTime<Utc>,
    pub status: AssignmentStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ActiveTasksFile {
    #[serde(default)]
    tasks: BTreeMap<String, ActiveTask>,
}

/// Durable `task id -> assignment` map, so a restarted loop picks up where it left off.
#[derive(Debug, Clone)]
pub struct ActiveTaskStore {
    store: RecordStore,
}

impl ActiveTaskStore {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    fn load(&self) -> ActiveTasksFile {
        self.store
            .read_or_default(&self.store.layout().active_tasks_file())
    }

    fn save(&self, file: &ActiveTasksFile) -> CoordResult<()> {
        self.store
            .write(&self.store.layout().active_tasks_file(), file)?;
        Ok(())
    }

    pub fn all(&self) -> Vec<ActiveTask> {
        self.load().tasks.into_values().collect()
    }

    pub fn get(&self, task_id: &str) -> Option<ActiveTask> {
        self.load().tasks.remove(task_id)
    }

    pub fn insert(&self, task: ActiveTask) -> CoordResult<()> {
        let mut file = self.load();
        file.tasks.insert(task.task_id.clone(), task);
        self.save(&file)
    }

    pub fn remove(&self, task_id: &str) -> CoordResult<Option<ActiveTask>> {
        let mut file = self.load();
        let removed = file.tasks.remove(task_id);
        if removed.is_some() {
            self.save(&file)?;
        }
        Ok(removed)
    }

    /// Set a task's status. Returns the previous status, or `None` if it is not active.
    pub fn set_status(
        &self,
        task_id: &str,
        status: AssignmentStatus,
    ) -> CoordResult<Option<AssignmentStatus>> {
        let mut file = self.load();
        let Some(task) = file.tasks.get_mut(task_id) else {
            return Ok(None);
        };
        let previous = task.status;
        if previous != status {
            task.status = status;
            self.save(&file)?;
        }
        Ok(Some(previous))
    }

    /// Whether any active task occupies `role`.
    pub fn is_busy(&self, role: WorkerRole) -> bool {
        self.load().tasks.values().any(|t| t.role == role)
    }
}
