//! Bounded per-role FIFO queues.
//!
//! Each role's queue is its own document under `state/pending/<role>.json`. Items are kept
//! in insertion order; `priority` is advisory and only consulted by [`QueueManager::prioritized`].

use crate::errors::{CoordError, CoordResult};
use crate::store::{RecordStore, StoreGuard};
use crate::worker::WorkerRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: QueueItemStatus,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    /// Handoff the item was created from, when it came from a stage transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_from: Option<WorkerRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_path: Option<PathBuf>,
}

impl QueueItem {
    pub fn new(task_id: &str, title: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            project_id: None,
            title: title.to_string(),
            priority: 0,
            status: QueueItemStatus::Pending,
            enqueued_at: Utc::now(),
            workflow: None,
            handoff_path: None,
            handoff_from: None,
            plan_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueFile {
    #[serde(default)]
    items: Vec<QueueItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReceipt {
    pub role: WorkerRole,
    /// 1-based position from the head
    pub position: usize,
    pub estimated_wait_ms: u64,
    pub queue_length: usize,
}

#[derive(Debug, Clone)]
pub struct QueueManager {
    store: RecordStore,
    max_length: usize,
    task_estimate_ms: u64,
}

impl QueueManager {
    pub fn new(store: RecordStore, max_length: usize, task_estimate_ms: u64) -> Self {
        Self {
            store,
            max_length,
            task_estimate_ms,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn load(&self, role: WorkerRole) -> QueueFile {
        self.store
            .read_or_default(&self.store.layout().queue_file(role.as_str()))
    }

    fn save(&self, role: WorkerRole, mut file: QueueFile) -> CoordResult<()> {
        file.updated_at = Some(Utc::now());
        self.store
            .write(&self.store.layout().queue_file(role.as_str()), &file)?;
        Ok(())
    }

    pub fn enqueue(&self, role: WorkerRole, item: QueueItem) -> CoordResult<EnqueueReceipt> {
        let guard = self.store.exclusive()?;
        self.enqueue_guarded(&guard, role, item)
    }

    /// Append under a guard the caller already holds.
    pub fn enqueue_guarded(
        &self,
        _guard: &StoreGuard,
        role: WorkerRole,
        item: QueueItem,
    ) -> CoordResult<EnqueueReceipt> {
        let mut file = self.load(role);
        if file.items.len() >= self.max_length {
            return Err(CoordError::QueueFull {
                role: role.to_string(),
                max_length: self.max_length,
            });
        }

        tracing::debug!(%role, task_id = %item.task_id, "enqueue");
        file.items.push(item);
        let position = file.items.len();
        self.save(role, file)?;

        Ok(EnqueueReceipt {
            role,
            position,
            estimated_wait_ms: position as u64 * self.task_estimate_ms,
            queue_length: position,
        })
    }

    /// Remove and return the head.
    pub fn dequeue(&self, role: WorkerRole) -> CoordResult<Option<QueueItem>> {
        let _guard = self.store.exclusive()?;
        let mut file = self.load(role);
        if file.items.is_empty() {
            return Ok(None);
        }
        let mut item = file.items.remove(0);
        self.save(role, file)?;
        item.status = QueueItemStatus::InProgress;
        Ok(Some(item))
    }

    pub fn peek(&self, role: WorkerRole) -> Option<QueueItem> {
        self.load(role).items.into_iter().next()
    }

    /// Empty the queue, returning how many items were dropped.
    pub fn clear(&self, role: WorkerRole) -> CoordResult<usize> {
        let _guard = self.store.exclusive()?;
        let file = self.load(role);
        let dropped = file.items.len();
        self.save(role, QueueFile::default())?;
        Ok(dropped)
    }

    pub fn len(&self, role: WorkerRole) -> usize {
        self.load(role).items.len()
    }

    pub fn is_empty(&self, role: WorkerRole) -> bool {
        self.len(role) == 0
    }

    pub fn is_full(&self, role: WorkerRole) -> bool {
        self.len(role) >= self.max_length
    }

    /// Items in queue order.
    pub fn list(&self, role: WorkerRole) -> Vec<QueueItem> {
        self.load(role).items
    }

    /// Snapshot sorted by priority descending; equal priorities keep queue order.
    pub fn prioritized(&self, role: WorkerRole) -> Vec<QueueItem> {
        let mut items = self.list(role);
        items.sort_by_key(|item| Reverse(item.priority));
        items
    }
}

/// Task ids waiting in any role's queue.
pub fn queued_task_ids(store: &RecordStore) -> HashSet<String> {
    WorkerRole::ALL
        .iter()
        .flat_map(|role| {
            store
                .read_or_default::<QueueFile>(&store.layout().queue_file(role.as_str()))
                .items
        })
        .map(|item| item.task_id)
        .collect()
}
