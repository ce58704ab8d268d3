use super::inbox::{Inbox, InboxSummary};
use super::state::{ActiveTask, ActiveTaskStore, AssignmentStatus};
use crate::audit::{AuditEvent, AuditLogger, SYSTEM_ACTOR};
use crate::config::SwitchyardConfig;
use crate::errors::{CoordError, CoordResult};
use crate::notify::{self, Notification, Notifier, NotifyKind};
use crate::pipeline::{AdvanceOutcome, PipelineRouter, TaskContext};
use crate::progress::{ProgressRecord, ProgressReport, ProgressTracker, TaskStatus};
use crate::queue::{QueueItem, QueueManager};
use crate::store::RecordStore;
use crate::worker::{SpawnStatus, TmuxLauncher, WorkerLauncher, WorkerRole};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// The instruction a worker receives for `item`.
pub fn dispatch_instruction(item: &QueueItem) -> String {
    if let Some(handoff) = &item.handoff_path {
        format!("/skill plan-execute --handoff {}", handoff.display())
    } else if let Some(plan) = &item.plan_path {
        format!("/skill plan-execute --plan {}", plan.display())
    } else {
        format!("/skill plan-execute --task {}", item.task_id)
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub inbox: InboxSummary,
    pub advanced: Vec<String>,
    pub completed: Vec<String>,
    pub blocked: Vec<String>,
    pub failed: Vec<String>,
    /// Finished tasks held back because the next stage's queue is full.
    pub deferred: Vec<String>,
    pub dispatched: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub role: WorkerRole,
    pub length: usize,
    pub max_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub role: WorkerRole,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub queues: Vec<QueueStatus>,
    pub active: Vec<ActiveTask>,
    pub workers: Vec<WorkerStatus>,
}

/// Single cooperative scheduler that drains queues into idle workers and moves finished
/// tasks along their pipelines.
pub struct Orchestrator {
    router: PipelineRouter,
    progress: ProgressTracker,
    active: ActiveTaskStore,
    inbox: Inbox,
    launcher: Arc<dyn WorkerLauncher>,
    notifier: Arc<dyn Notifier>,
    roles: Vec<WorkerRole>,
    interval: Duration,
    audit: AuditLogger,
}

impl Orchestrator {
    pub fn new(
        store: RecordStore,
        router: PipelineRouter,
        launcher: Arc<dyn WorkerLauncher>,
        notifier: Arc<dyn Notifier>,
        roles: Vec<WorkerRole>,
    ) -> Self {
        Self {
            progress: ProgressTracker::new(store.clone()),
            active: ActiveTaskStore::new(store.clone()),
            inbox: Inbox::new(store.clone()),
            audit: AuditLogger::new(&store.layout().audit_log()),
            router,
            launcher,
            notifier,
            roles,
            interval: Duration::from_secs(5),
        }
    }

    /// Wire the orchestrator from configuration with tmux workers and the configured notifier.
    pub fn from_config(config: &SwitchyardConfig) -> Self {
        let store = RecordStore::new(&config.project_dir);
        let limits = &config.toml.limits;
        let queues = QueueManager::new(store.clone(), limits.max_queue_length, limits.task_estimate_ms);
        let router = PipelineRouter::new(store.clone(), config.workflows(), queues);

        let workers = &config.toml.workers;
        let launcher = TmuxLauncher::new(&config.worker_command(), &workers.session_prefix)
            .with_startup_delay(Duration::from_millis(workers.startup_delay_ms));
        let notifier: Arc<dyn Notifier> =
            Arc::from(notify::from_webhook(config.toml.notifications.webhook_url.as_deref()));

        Self::new(store, router, Arc::new(launcher), notifier, config.worker_roles())
            .with_interval(Duration::from_millis(config.toml.orchestrator.loop_interval_ms))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn router(&self) -> &PipelineRouter {
        &self.router
    }

    /// Start every managed worker that is not already running.
    pub async fn initialize(&self) -> Vec<(WorkerRole, SpawnStatus)> {
        let mut started = Vec::new();
        for &role in &self.roles {
            if self.launcher.is_running(role).await {
                continue;
            }
            let status = self.launcher.spawn(role).await;
            match &status {
                SpawnStatus::Error { message } => {
                    tracing::warn!(%role, %message, "worker failed to start")
                }
                other => tracing::debug!(%role, status = ?other, "worker spawn requested"),
            }
            started.push((role, status));
        }
        started
    }

    /// Run ticks until `shutdown` flips to true. A tick in progress always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> CoordResult<()> {
        self.initialize().await;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "orchestrator running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.tick().await {
                Ok(summary) => tracing::debug!(?summary, "tick"),
                Err(e) => tracing::error!(error = %e, code = %e.code(), "tick failed"),
            }
            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!("orchestrator stopped");
        Ok(())
    }

    /// One pass: take inbox submissions, react to reported progress, dispatch idle workers.
    pub async fn tick(&self) -> CoordResult<TickSummary> {
        let mut summary = TickSummary {
            inbox: self.inbox.drain(&self.router)?,
            ..Default::default()
        };
        self.monitor(&mut summary).await?;
        self.process_queues(&mut summary).await?;
        Ok(summary)
    }

    async fn monitor(&self, summary: &mut TickSummary) -> CoordResult<()> {
        for task in self.active.all() {
            let Some(record) = self.progress.read(&task.task_id)? else {
                tracing::debug!(task_id = %task.task_id, "no progress record yet");
                continue;
            };
            match record.status {
                TaskStatus::Complete => self.finish_stage(&task, &record, summary).await?,
                TaskStatus::Blocked => {
                    let detail = if record.blockers.is_empty() {
                        "Worker reported BLOCKED".to_string()
                    } else {
                        record.blockers.join("; ")
                    };
                    self.escalate(&task, AssignmentStatus::Blocked, NotifyKind::Blocked, detail)
                        .await?;
                    summary.blocked.push(task.task_id.clone());
                }
                TaskStatus::Failed => {
                    let detail = record
                        .summary
                        .clone()
                        .unwrap_or_else(|| "Worker reported FAILED".to_string());
                    self.escalate(&task, AssignmentStatus::Failed, NotifyKind::Failed, detail)
                        .await?;
                    summary.failed.push(task.task_id.clone());
                }
                TaskStatus::InProgress => {
                    self.active
                        .set_status(&task.task_id, AssignmentStatus::InProgress)?;
                }
            }
        }
        Ok(())
    }

    async fn finish_stage(
        &self,
        task: &ActiveTask,
        record: &ProgressRecord,
        summary: &mut TickSummary,
    ) -> CoordResult<()> {
        let context = TaskContext {
            task_id: task.task_id.clone(),
            title: task.title.clone(),
            project_id: task.project_id.clone(),
            priority: task.priority,
            workflow: task.workflow.clone(),
        };

        match self.router.advance(&context, task.role, &record.stage_result()) {
            Ok(AdvanceOutcome::Complete { workflow, .. }) => {
                self.active.remove(&task.task_id)?;
                self.send(
                    Notification::new(
                        NotifyKind::Complete,
                        &task.task_id,
                        format!("Task {} completed workflow {}", task.task_id, workflow),
                    )
                    .with_data(json!({ "workflow": workflow })),
                )
                .await;
                summary.completed.push(task.task_id.clone());
            }
            Ok(AdvanceOutcome::Advanced { next, .. }) => {
                self.active.remove(&task.task_id)?;
                tracing::info!(task_id = %task.task_id, from = %task.role, %next, "handed off");
                summary.advanced.push(task.task_id.clone());
            }
            Err(CoordError::ConfidenceBelowThreshold {
                confidence,
                threshold,
            }) => {
                let previous = self
                    .active
                    .set_status(&task.task_id, AssignmentStatus::Blocked)?;
                if previous != Some(AssignmentStatus::Blocked) {
                    self.audit.record_quietly(
                        AuditEvent::StageBlocked,
                        SYSTEM_ACTOR,
                        json!({
                            "taskId": task.task_id,
                            "stage": task.role,
                            "confidence": confidence,
                            "threshold": threshold,
                        }),
                    );
                    self.send(
                        Notification::new(
                            NotifyKind::ReviewRejected,
                            &task.task_id,
                            format!(
                                "Review confidence {} below threshold {} for {}",
                                confidence, threshold, task.task_id
                            ),
                        )
                        .with_data(json!({
                            "confidence": confidence,
                            "threshold": threshold,
                            "summary": record.summary,
                            "blockers": record.blockers,
                        })),
                    )
                    .await;
                }
                summary.blocked.push(task.task_id.clone());
            }
            Err(CoordError::QueueFull { role, .. }) => {
                tracing::debug!(task_id = %task.task_id, %role, "next queue full, retrying next tick");
                summary.deferred.push(task.task_id.clone());
            }
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "advance failed");
                self.escalate(task, AssignmentStatus::Failed, NotifyKind::Failed, e.to_string())
                    .await?;
                summary.failed.push(task.task_id.clone());
            }
        }
        Ok(())
    }

    /// Mark `task` and notify, but only on the transition into `status`.
    async fn escalate(
        &self,
        task: &ActiveTask,
        status: AssignmentStatus,
        kind: NotifyKind,
        detail: String,
    ) -> CoordResult<()> {
        let previous = self.active.set_status(&task.task_id, status)?;
        if previous.is_some_and(|p| p != status) {
            self.send(
                Notification::new(kind, &task.task_id, detail)
                    .with_data(json!({ "stage": task.role })),
            )
            .await;
        }
        Ok(())
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(task_id = %notification.task_id, error = %e, "notification failed");
        }
    }

    async fn process_queues(&self, summary: &mut TickSummary) -> CoordResult<()> {
        let queues = self.router.queues();
        for &role in &self.roles {
            if self.active.is_busy(role) || queues.is_empty(role) {
                continue;
            }
            if !self.launcher.is_running(role).await {
                tracing::debug!(%role, "worker not running, leaving queue");
                continue;
            }
            let Some(item) = queues.dequeue(role)? else {
                continue;
            };

            self.progress
                .create(&item.task_id, role, &item.title, item.workflow.as_deref())?;
            self.active.insert(ActiveTask {
                task_id: item.task_id.clone(),
                role,
                workflow: item.workflow.clone(),
                project_id: item.project_id.clone(),
                title: item.title.clone(),
                priority: item.priority,
                started_at: Utc::now(),
                status: AssignmentStatus::InProgress,
            })?;

            let instruction = dispatch_instruction(&item);
            if let Err(e) = self.launcher.dispatch(role, &instruction).await {
                tracing::error!(task_id = %item.task_id, %role, error = %e, "dispatch failed");
                self.progress.report(
                    &item.task_id,
                    ProgressReport {
                        status: Some(TaskStatus::Failed),
                        message: Some(format!("Dispatch failed: {:#}", e)),
                        ..Default::default()
                    },
                )?;
                self.active
                    .set_status(&item.task_id, AssignmentStatus::Failed)?;
                self.send(Notification::new(
                    NotifyKind::Failed,
                    &item.task_id,
                    format!("Could not dispatch {} to {}: {:#}", item.task_id, role, e),
                ))
                .await;
                summary.failed.push(item.task_id);
                continue;
            }

            tracing::info!(task_id = %item.task_id, %role, "task dispatched");
            self.audit.record_quietly(
                AuditEvent::TaskDispatched,
                SYSTEM_ACTOR,
                json!({ "taskId": item.task_id, "role": role, "instruction": instruction }),
            );
            summary.dispatched.push(item.task_id);
        }
        Ok(())
    }

    pub async fn status(&self) -> StatusReport {
        let queues = self.router.queues();
        let mut workers = Vec::new();
        for &role in &self.roles {
            workers.push(WorkerStatus {
                role,
                running: self.launcher.is_running(role).await,
            });
        }
        StatusReport {
            queues: self
                .roles
                .iter()
                .map(|&role| QueueStatus {
                    role,
                    length: queues.len(role),
                    max_length: queues.max_length(),
                    head: queues.peek(role).map(|item| item.task_id),
                })
                .collect(),
            active: self.active.all(),
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwitchyardToml;
    use crate::pipeline::{TaskSubmission, WorkflowSet};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeLauncher {
        running: Mutex<HashSet<WorkerRole>>,
        dispatched: Mutex<Vec<(WorkerRole, String)>>,
        fail_dispatch: bool,
    }

    #[async_trait]
    impl WorkerLauncher for FakeLauncher {
        async fn spawn(&self, role: WorkerRole) -> SpawnStatus {
            self.running.lock().unwrap().insert(role);
            SpawnStatus::Running
        }

        async fn kill(&self, role: WorkerRole) -> anyhow::Result<()> {
            self.running.lock().unwrap().remove(&role);
            Ok(())
        }

        async fn is_running(&self, role: WorkerRole) -> bool {
            self.running.lock().unwrap().contains(&role)
        }

        async fn dispatch(&self, role: WorkerRole, instruction: &str) -> anyhow::Result<()> {
            if self.fail_dispatch {
                anyhow::bail!("pane gone");
            }
            self.dispatched
                .lock()
                .unwrap()
                .push((role, instruction.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, n: &Notification) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(n.clone());
            Ok(())
        }
    }

    impl RecordingNotifier {
        fn kinds(&self) -> Vec<NotifyKind> {
            self.sent.lock().unwrap().iter().map(|n| n.kind).collect()
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        launcher: Arc<FakeLauncher>,
        notifier: Arc<RecordingNotifier>,
        progress: ProgressTracker,
        _dir: tempfile::TempDir,
    }

    fn harness(launcher: FakeLauncher, max_queue: usize) -> Harness {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.layout().init().unwrap();
        let queues = QueueManager::new(store.clone(), max_queue, 1000);
        let workflows = WorkflowSet::new(SwitchyardToml::default().workflows);
        let router = PipelineRouter::new(store.clone(), workflows, queues);
        let launcher = Arc::new(launcher);
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Orchestrator::new(
            store.clone(),
            router,
            launcher.clone(),
            notifier.clone(),
            vec![
                WorkerRole::Backend,
                WorkerRole::Review,
                WorkerRole::Frontend,
                WorkerRole::Qa,
            ],
        )
        .with_interval(Duration::from_millis(10));
        Harness {
            orchestrator,
            launcher,
            notifier,
            progress: ProgressTracker::new(store),
            _dir: dir,
        }
    }

    fn submit(h: &Harness, task_id: &str) {
        h.orchestrator
            .router()
            .submit(TaskSubmission {
                task_id: task_id.to_string(),
                title: "Add login".to_string(),
                project_id: None,
                priority: 0,
                workflow: None,
                plan_path: None,
            })
            .unwrap();
    }

    fn report(h: &Harness, task_id: &str, status: TaskStatus, confidence: Option<f64>) {
        h.progress
            .report(
                task_id,
                ProgressReport {
                    status: Some(status),
                    confidence,
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_dispatch_instruction_variants() {
        let mut item = QueueItem::new("T-1", "x");
        assert_eq!(dispatch_instruction(&item), "/skill plan-execute --task T-1");
        item.plan_path = Some("plans/t1.md".into());
        assert_eq!(
            dispatch_instruction(&item),
            "/skill plan-execute --plan plans/t1.md"
        );
        item.handoff_path = Some("h.md".into());
        assert_eq!(dispatch_instruction(&item), "/skill plan-execute --handoff h.md");
    }

    #[tokio::test]
    async fn test_initialize_spawns_missing_workers() {
        let h = harness(FakeLauncher::default(), 3);
        h.launcher.running.lock().unwrap().insert(WorkerRole::Backend);
        let started = h.orchestrator.initialize().await;
        assert_eq!(started.len(), 3);
        assert!(started.iter().all(|(role, _)| *role != WorkerRole::Backend));
    }

    #[tokio::test]
    async fn test_task_walks_the_pipeline() {
        let h = harness(FakeLauncher::default(), 3);
        h.orchestrator.initialize().await;
        submit(&h, "T-1");

        let summary = h.orchestrator.tick().await.unwrap();
        assert_eq!(summary.dispatched, vec!["T-1"]);
        assert_eq!(
            h.launcher.dispatched.lock().unwrap()[0],
            (WorkerRole::Backend, "/skill plan-execute --task T-1".to_string())
        );

        // Still in progress: nothing moves and the backend stays busy.
        let summary = h.orchestrator.tick().await.unwrap();
        assert!(summary.dispatched.is_empty() && summary.advanced.is_empty());

        report(&h, "T-1", TaskStatus::Complete, None);
        let summary = h.orchestrator.tick().await.unwrap();
        assert_eq!(summary.advanced, vec!["T-1"]);
        assert_eq!(summary.dispatched, vec!["T-1"]);
        let (role, instruction) = h.launcher.dispatched.lock().unwrap()[1].clone();
        assert_eq!(role, WorkerRole::Review);
        assert!(instruction.starts_with("/skill plan-execute --handoff "));

        // Low review confidence blocks and notifies once.
        report(&h, "T-1", TaskStatus::Complete, Some(0.5));
        let summary = h.orchestrator.tick().await.unwrap();
        assert_eq!(summary.blocked, vec!["T-1"]);
        h.orchestrator.tick().await.unwrap();
        assert_eq!(h.notifier.kinds(), vec![NotifyKind::ReviewRejected]);

        report(&h, "T-1", TaskStatus::Complete, Some(0.9));
        let summary = h.orchestrator.tick().await.unwrap();
        assert_eq!(summary.advanced, vec!["T-1"]);
        assert_eq!(h.launcher.dispatched.lock().unwrap()[2].0, WorkerRole::Frontend);

        report(&h, "T-1", TaskStatus::Complete, None);
        h.orchestrator.tick().await.unwrap();
        report(&h, "T-1", TaskStatus::Complete, None);
        let summary = h.orchestrator.tick().await.unwrap();
        assert_eq!(summary.completed, vec!["T-1"]);
        assert_eq!(
            h.notifier.kinds(),
            vec![NotifyKind::ReviewRejected, NotifyKind::Complete]
        );
        assert!(h.orchestrator.status().await.active.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_report_notifies_once() {
        let h = harness(FakeLauncher::default(), 3);
        h.orchestrator.initialize().await;
        submit(&h, "T-1");
        h.orchestrator.tick().await.unwrap();

        report(&h, "T-1", TaskStatus::Blocked, None);
        h.orchestrator.tick().await.unwrap();
        h.orchestrator.tick().await.unwrap();
        assert_eq!(h.notifier.kinds(), vec![NotifyKind::Blocked]);

        // Unblocked then blocked again is a new transition.
        report(&h, "T-1", TaskStatus::InProgress, None);
        h.orchestrator.tick().await.unwrap();
        report(&h, "T-1", TaskStatus::Blocked, None);
        h.orchestrator.tick().await.unwrap();
        assert_eq!(
            h.notifier.kinds(),
            vec![NotifyKind::Blocked, NotifyKind::Blocked]
        );
    }

    #[tokio::test]
    async fn test_idle_worker_not_running_keeps_queue() {
        let h = harness(FakeLauncher::default(), 3);
        submit(&h, "T-1");
        let summary = h.orchestrator.tick().await.unwrap();
        assert!(summary.dispatched.is_empty());
        assert_eq!(h.orchestrator.router().queues().len(WorkerRole::Backend), 1);
    }

    #[tokio::test]
    async fn test_full_next_queue_defers_advance() {
        let h = harness(FakeLauncher::default(), 1);
        h.orchestrator.initialize().await;
        // Stop review so its queue fills up.
        h.launcher.kill(WorkerRole::Review).await.unwrap();
        submit(&h, "T-1");
        h.orchestrator.tick().await.unwrap();
        report(&h, "T-1", TaskStatus::Complete, None);
        h.orchestrator.tick().await.unwrap();
        assert_eq!(h.orchestrator.router().queues().len(WorkerRole::Review), 1);

        submit(&h, "T-2");
        h.orchestrator.tick().await.unwrap();
        report(&h, "T-2", TaskStatus::Complete, None);
        let summary = h.orchestrator.tick().await.unwrap();
        assert_eq!(summary.deferred, vec!["T-2"]);
        let status = h.orchestrator.status().await;
        assert_eq!(status.active.len(), 1);
        assert_eq!(status.active[0].role, WorkerRole::Backend);
    }

    #[tokio::test]
    async fn test_dispatch_failure_marks_failed() {
        let h = harness(
            FakeLauncher {
                fail_dispatch: true,
                ..Default::default()
            },
            3,
        );
        h.orchestrator.initialize().await;
        submit(&h, "T-1");
        let summary = h.orchestrator.tick().await.unwrap();
        assert_eq!(summary.failed, vec!["T-1"]);
        assert_eq!(h.notifier.kinds(), vec![NotifyKind::Failed]);
        let record = h.progress.read("T-1").unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);

        // The failure is not re-announced on later ticks.
        h.orchestrator.tick().await.unwrap();
        assert_eq!(h.notifier.kinds(), vec![NotifyKind::Failed]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(FakeLauncher::default(), 3);
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });
        tokio::time::timeout(Duration::from_secs(5), h.orchestrator.run(rx))
            .await
            .expect("loop should stop")
            .unwrap();
        stopper.await.unwrap();
    }
}
