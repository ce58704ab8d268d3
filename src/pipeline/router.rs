use super::handoff::{Handoff, HandoffStore, StageResult, StoredHandoff};
use super::workflow::{StageInfo, WorkflowSet};
use crate::audit::{AuditEvent, AuditLogger, SYSTEM_ACTOR};
use crate::errors::{CoordError, CoordResult};
use crate::queue::{EnqueueReceipt, QueueItem, QueueManager};
use crate::store::RecordStore;
use crate::worker::WorkerRole;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;

/// A new task entering the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub task_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_path: Option<PathBuf>,
}

/// The task being moved by `advance`; carried onto the next stage's queue item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub task_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
}

impl TaskContext {
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub workflow: String,
    pub entry_stage: WorkerRole,
    pub pipeline: Vec<WorkerRole>,
    pub review_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub task_id: String,
    #[serde(flatten)]
    pub route: RouteInfo,
    pub position: usize,
    pub estimated_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The task finished the last stage of its workflow.
    #[serde(rename_all = "camelCase")]
    Complete {
        task_id: String,
        stage: WorkerRole,
        workflow: String,
    },
    /// The task was handed to the next stage's queue.
    #[serde(rename_all = "camelCase")]
    Advanced {
        task_id: String,
        from: WorkerRole,
        next: WorkerRole,
        workflow: String,
        handoff: StoredHandoff,
        position: usize,
        estimated_wait_ms: u64,
    },
}

impl AdvanceOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, AdvanceOutcome::Complete { .. })
    }
}

/// Stage state machine over the configured workflows.
#[derive(Debug, Clone)]
pub struct PipelineRouter {
    store: RecordStore,
    workflows: WorkflowSet,
    queues: QueueManager,
    handoffs: HandoffStore,
    audit: AuditLogger,
}

impl PipelineRouter {
    pub fn new(store: RecordStore, workflows: WorkflowSet, queues: QueueManager) -> Self {
        let audit = AuditLogger::new(&store.layout().audit_log());
        let handoffs = HandoffStore::new(store.clone());
        Self {
            store,
            workflows,
            queues,
            handoffs,
            audit,
        }
    }

    pub fn workflows(&self) -> &WorkflowSet {
        &self.workflows
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn handoffs(&self) -> &HandoffStore {
        &self.handoffs
    }

    pub fn route_task(&self, workflow: Option<&str>) -> CoordResult<RouteInfo> {
        let resolved = self.workflows.resolve(workflow)?;
        let entry_stage = resolved
            .workflow
            .entry_stage()
            .ok_or_else(|| CoordError::EmptyPipeline {
                name: resolved.name.clone(),
            })?;
        Ok(RouteInfo {
            workflow: resolved.name,
            entry_stage,
            pipeline: resolved.workflow.pipeline,
            review_threshold: resolved.workflow.review_threshold,
        })
    }

    /// Route a new task to its entry stage and enqueue it there.
    pub fn submit(&self, task: TaskSubmission) -> CoordResult<SubmitReceipt> {
        if task.task_id.trim().is_empty() {
            return Err(CoordError::MissingArgs("Task ID required".to_string()));
        }
        let route = self.route_task(task.workflow.as_deref())?;

        let mut item = QueueItem::new(&task.task_id, &task.title);
        item.project_id = task.project_id;
        item.priority = task.priority;
        item.workflow = Some(route.workflow.clone());
        item.plan_path = task.plan_path;

        let EnqueueReceipt {
            position,
            estimated_wait_ms,
            ..
        } = self.queues.enqueue(route.entry_stage, item)?;

        tracing::info!(task_id = %task.task_id, stage = %route.entry_stage, workflow = %route.workflow, "task submitted");
        self.audit.record_quietly(
            AuditEvent::TaskSubmitted,
            SYSTEM_ACTOR,
            json!({ "taskId": task.task_id, "stage": route.entry_stage, "workflow": route.workflow }),
        );

        Ok(SubmitReceipt {
            task_id: task.task_id,
            route,
            position,
            estimated_wait_ms,
        })
    }

    /// Move `task` past `current` given the stage's result.
    ///
    /// Leaving the review stage with a reported confidence below the workflow threshold is
    /// refused, as is advancing into a full queue. Neither refusal writes anything.
    pub fn advance(
        &self,
        task: &TaskContext,
        current: WorkerRole,
        result: &StageResult,
    ) -> CoordResult<AdvanceOutcome> {
        result.validate()?;
        let resolved = self.workflows.resolve(task.workflow.as_deref())?;
        let workflow = &resolved.workflow;

        let info = workflow
            .stage_info(current)
            .ok_or_else(|| CoordError::AgentNotInPipeline {
                stage: current.to_string(),
                workflow: resolved.name.clone(),
            })?;

        let Some(next) = info.next else {
            tracing::info!(task_id = %task.task_id, stage = %current, "pipeline complete");
            self.audit.record_quietly(
                AuditEvent::TaskCompleted,
                SYSTEM_ACTOR,
                json!({ "taskId": task.task_id, "stage": current, "workflow": resolved.name }),
            );
            return Ok(AdvanceOutcome::Complete {
                task_id: task.task_id.clone(),
                stage: current,
                workflow: resolved.name,
            });
        };

        if current.is_review()
            && let Some(confidence) = result.confidence
            && confidence < workflow.review_threshold
        {
            tracing::warn!(
                task_id = %task.task_id,
                confidence,
                threshold = workflow.review_threshold,
                "review confidence below threshold"
            );
            return Err(CoordError::ConfidenceBelowThreshold {
                confidence,
                threshold: workflow.review_threshold,
            });
        }

        let guard = self.store.exclusive()?;
        if self.queues.is_full(next) {
            return Err(CoordError::QueueFull {
                role: next.to_string(),
                max_length: self.queues.max_length(),
            });
        }

        let handoff = Handoff::from_result(&task.task_id, &resolved.name, current, next, result);
        let stored = self.handoffs.write_once(&handoff)?;

        let mut item = QueueItem::new(&task.task_id, &task.title);
        item.project_id = task.project_id.clone();
        item.priority = task.priority;
        item.workflow = Some(resolved.name.clone());
        item.handoff_path = Some(stored.markdown_path.clone());
        item.handoff_from = Some(current);
        let receipt = self.queues.enqueue_guarded(&guard, next, item)?;
        drop(guard);

        tracing::info!(task_id = %task.task_id, from = %current, to = %next, "stage advanced");
        self.audit.record_quietly(
            AuditEvent::StageAdvanced,
            SYSTEM_ACTOR,
            json!({
                "taskId": task.task_id,
                "from": current,
                "to": next,
                "handoff": stored.path,
            }),
        );

        Ok(AdvanceOutcome::Advanced {
            task_id: task.task_id.clone(),
            from: current,
            next,
            workflow: resolved.name,
            handoff: stored,
            position: receipt.position,
            estimated_wait_ms: receipt.estimated_wait_ms,
        })
    }

    pub fn next_agent(&self, workflow: Option<&str>, stage: WorkerRole) -> CoordResult<Option<WorkerRole>> {
        Ok(self.stage_info(workflow, stage)?.next)
    }

    pub fn stage_info(&self, workflow: Option<&str>, stage: WorkerRole) -> CoordResult<StageInfo> {
        let resolved = self.workflows.resolve(workflow)?;
        resolved
            .workflow
            .stage_info(stage)
            .ok_or_else(|| CoordError::AgentNotInPipeline {
                stage: stage.to_string(),
                workflow: resolved.name,
            })
    }

    pub fn needs_review_before_advance(
        &self,
        workflow: Option<&str>,
        stage: WorkerRole,
    ) -> CoordResult<bool> {
        let resolved = self.workflows.resolve(workflow)?;
        Ok(resolved.workflow.needs_review_before_advance(stage))
    }
}
