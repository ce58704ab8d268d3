//! Administrative garbage collection: ending stale sessions, sweeping lapsed leases,
//! finding checkouts nobody owns any more and archiving finished progress records.

use crate::audit::{AuditEvent, AuditLogger, SYSTEM_ACTOR};
use crate::checkout::CheckoutProvider;
use crate::errors::{CoordResult, ErrorCode};
use crate::lock::LocksFile;
use crate::orchestrator::ActiveTaskStore;
use crate::pipeline::HandoffStore;
use crate::progress::{ProgressRecord, TaskStatus};
use crate::project::ProjectRegistry;
use crate::queue::queued_task_ids;
use crate::session::{Session, SessionManager};
use crate::store::{RecordStore, StoreGuard};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// The owning session has ended.
    SessionEnded,
    /// The owning session is idle beyond its TTL.
    SessionOld,
    /// Managed by the checkout provider but recorded by no active session.
    Unowned,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedCheckout {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub reason: OrphanReason,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub dry_run: bool,
    pub sessions_ended: Vec<String>,
    pub locks_released: Vec<String>,
    pub locks_expired: Vec<String>,
    pub orphaned_checkouts: Vec<OrphanedCheckout>,
    pub archive: ArchiveReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub dry_run: bool,
    /// `YYYY-MM` bucket under `state/archive/`
    pub month: String,
    /// Tasks whose progress record was archived
    pub tasks: Vec<String>,
    /// Handoff file names moved along with them
    pub handoffs: Vec<String>,
}

/// Contents of one monthly archive bucket.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMonth {
    pub progress: Vec<String>,
    pub handoffs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneSkip {
    pub path: PathBuf,
    pub error: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub dry_run: bool,
    pub removed: Vec<PathBuf>,
    pub skipped: Vec<PruneSkip>,
}

#[derive(Clone)]
pub struct Cleaner {
    store: RecordStore,
    sessions: SessionManager,
    projects: ProjectRegistry,
    checkouts: Option<Arc<dyn CheckoutProvider>>,
    audit: AuditLogger,
}

impl Cleaner {
    pub fn new(store: RecordStore, sessions: SessionManager) -> Self {
        let audit = AuditLogger::new(&store.layout().audit_log());
        let projects = ProjectRegistry::new(store.clone());
        Self {
            store,
            sessions,
            projects,
            checkouts: None,
            audit,
        }
    }

    pub fn with_checkouts(mut self, checkouts: Arc<dyn CheckoutProvider>) -> Self {
        self.checkouts = Some(checkouts);
        self
    }

    /// End sessions idle past their TTL, release their locks, expire lapsed locks and
    /// report orphaned checkouts. With `dry_run` nothing is written.
    pub fn run(&self, dry_run: bool) -> CoordResult<CleanupReport> {
        let guard = self.store.exclusive()?;
        let now = Utc::now();
        let locks_path = self.store.layout().locks_file();
        let mut locks: LocksFile = self.store.read_or_default(&locks_path);

        let old = self.sessions.old_sessions();
        let mut sessions_ended = Vec::new();
        let mut locks_released = Vec::new();
        for session in &old {
            let released = if dry_run {
                locks
                    .live_owned_by(&session.id, now)
                    .into_iter()
                    .map(|l| l.id.clone())
                    .collect()
            } else {
                locks.release_owned(&session.id, now)
            };
            locks_released.extend(released);
            sessions_ended.push(session.id.clone());
        }

        let (locks_expired, _) = if dry_run {
            locks.clone().sweep(now, None)
        } else {
            locks.sweep(now, None)
        };

        if !dry_run {
            self.store.write(&locks_path, &locks)?;
            for session in &old {
                let mut session = session.clone();
                self.sessions.mark_ended(&mut session)?;
            }
        }

        let old_ids: HashSet<&str> = old.iter().map(|s| s.id.as_str()).collect();
        let orphaned_checkouts = self.find_orphans(&old_ids);
        let archive = self.archive_guarded(&guard, dry_run)?;

        tracing::info!(
            dry_run,
            sessions = sessions_ended.len(),
            released = locks_released.len(),
            expired = locks_expired.len(),
            orphans = orphaned_checkouts.len(),
            archived = archive.tasks.len(),
            "cleanup finished"
        );
        if !dry_run {
            self.audit.record_quietly(
                AuditEvent::Cleanup,
                SYSTEM_ACTOR,
                json!({
                    "sessionsEnded": sessions_ended,
                    "locksReleased": locks_released,
                    "locksExpired": locks_expired,
                }),
            );
        }

        Ok(CleanupReport {
            dry_run,
            sessions_ended,
            locks_released,
            locks_expired,
            orphaned_checkouts,
            archive,
        })
    }

    /// Move `COMPLETE` progress records, and the handoffs of their tasks, into
    /// `state/archive/<YYYY-MM>/`. Tasks still assigned or queued are left alone since
    /// their dispatch instructions point at the handoff files.
    pub fn archive(&self, dry_run: bool) -> CoordResult<ArchiveReport> {
        let guard = self.store.exclusive()?;
        self.archive_guarded(&guard, dry_run)
    }

    fn archive_guarded(&self, _guard: &StoreGuard, dry_run: bool) -> CoordResult<ArchiveReport> {
        let layout = self.store.layout();
        let month = Utc::now().format("%Y-%m").to_string();
        let bucket = layout.archive_month_dir(&month);
        let mut report = ArchiveReport {
            dry_run,
            month,
            tasks: Vec::new(),
            handoffs: Vec::new(),
        };

        let mut busy: HashSet<String> = ActiveTaskStore::new(self.store.clone())
            .all()
            .into_iter()
            .map(|task| task.task_id)
            .collect();
        busy.extend(queued_task_ids(&self.store));

        let handoffs = HandoffStore::new(self.store.clone());
        for (path, record) in self.progress_records()? {
            if record.status != TaskStatus::Complete || busy.contains(&record.task_id) {
                continue;
            }

            let mut handoff_files = Vec::new();
            for (json_path, _) in handoffs.entries(&record.task_id)? {
                let markdown = json_path.with_extension("md");
                if markdown.exists() {
                    handoff_files.push(markdown);
                }
                handoff_files.push(json_path);
            }

            if !dry_run {
                move_into(&path, &bucket.join("progress"))?;
                for file in &handoff_files {
                    move_into(file, &bucket.join("handoffs"))?;
                }
            }
            report.handoffs.extend(handoff_files.iter().map(|f| file_name(f)));
            report.tasks.push(record.task_id);
        }

        if !dry_run && !report.tasks.is_empty() {
            tracing::info!(tasks = report.tasks.len(), month = %report.month, "progress archived");
            self.audit.record_quietly(
                AuditEvent::RecordsArchived,
                SYSTEM_ACTOR,
                json!({ "month": report.month, "tasks": report.tasks, "handoffs": report.handoffs.len() }),
            );
        }
        Ok(report)
    }

    /// Progress records (not handoffs) currently under `state/progress/`.
    fn progress_records(&self) -> CoordResult<Vec<(PathBuf, ProgressRecord)>> {
        let dir = self.store.layout().progress_dir();
        let pattern = format!("{}/*.json", glob::Pattern::escape(&dir.to_string_lossy()));
        let mut records = Vec::new();
        for entry in glob::glob(&pattern).context("Invalid progress pattern")? {
            let Ok(path) = entry else { continue };
            if file_name(&path).starts_with("HANDOFF_") {
                continue;
            }
            match self.store.read_optional::<ProgressRecord>(&path) {
                Ok(Some(record)) => records.push((path, record)),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable progress record"),
            }
        }
        Ok(records)
    }

    /// Archived file names per month, oldest month first.
    pub fn archive_contents(&self) -> CoordResult<BTreeMap<String, ArchiveMonth>> {
        let root = self.store.layout().archive_dir();
        let mut months = BTreeMap::new();
        if !root.is_dir() {
            return Ok(months);
        }
        for entry in std::fs::read_dir(&root)
            .with_context(|| format!("Failed to read {}", root.display()))?
        {
            let entry = entry.context("Failed to read archive entry")?;
            if !entry.path().is_dir() {
                continue;
            }
            let month = ArchiveMonth {
                progress: sorted_names(&entry.path().join("progress"))?,
                handoffs: sorted_names(&entry.path().join("handoffs"))?,
            };
            months.insert(entry.file_name().to_string_lossy().into_owned(), month);
        }
        Ok(months)
    }

    /// Checkouts recorded by ended or old sessions, plus provider-managed checkouts that
    /// no active session records. `old_ids` are treated as ended.
    fn find_orphans(&self, old_ids: &HashSet<&str>) -> Vec<OrphanedCheckout> {
        let sessions: Vec<Session> = self
            .sessions
            .list(true)
            .into_iter()
            .map(|summary| summary.session)
            .collect();

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut owned: HashSet<PathBuf> = HashSet::new();
        let mut orphans = Vec::new();

        for session in &sessions {
            let Some(copy) = &session.working_copy else {
                continue;
            };
            let reason = if !session.is_active() {
                OrphanReason::SessionEnded
            } else if old_ids.contains(session.id.as_str()) {
                OrphanReason::SessionOld
            } else {
                owned.insert(copy.path.clone());
                continue;
            };
            if seen.insert(copy.path.clone()) {
                orphans.push(OrphanedCheckout {
                    path: copy.path.clone(),
                    branch: Some(copy.branch.clone()),
                    project_path: session.project.as_ref().map(|p| p.path.clone()),
                    session_id: Some(session.id.clone()),
                    reason,
                });
            }
        }

        let Some(provider) = &self.checkouts else {
            return orphans;
        };
        for project in self.projects.list() {
            let listed = match provider.list_checkouts(&project.path) {
                Ok(listed) => listed,
                Err(e) => {
                    tracing::debug!(project = %project.name, error = %e, "cannot list checkouts");
                    continue;
                }
            };
            for info in listed {
                if owned.contains(&info.path) || !seen.insert(info.path.clone()) {
                    continue;
                }
                orphans.push(OrphanedCheckout {
                    path: info.path,
                    branch: Some(info.branch),
                    project_path: Some(project.path.clone()),
                    session_id: None,
                    reason: OrphanReason::Unowned,
                });
            }
        }
        orphans
    }

    /// Remove orphaned checkouts. Dirty ones are skipped with `UNCOMMITTED_CHANGES` unless
    /// `force`; removal failures are skipped with `WORKTREE_FAILED`.
    pub fn prune(&self, dry_run: bool, force: bool) -> CoordResult<PruneReport> {
        let _guard = self.store.exclusive()?;
        let orphans = self.find_orphans(&HashSet::new());
        let mut report = PruneReport {
            dry_run,
            removed: Vec::new(),
            skipped: Vec::new(),
        };

        let Some(provider) = &self.checkouts else {
            return Ok(report);
        };

        for orphan in orphans {
            if !force && provider.has_uncommitted_changes(&orphan.path) {
                report.skipped.push(PruneSkip {
                    message: format!(
                        "{} has uncommitted changes. Use --force to remove anyway.",
                        orphan.path.display()
                    ),
                    path: orphan.path,
                    error: ErrorCode::UncommittedChanges,
                });
                continue;
            }
            if dry_run {
                report.removed.push(orphan.path);
                continue;
            }

            let Some(project_path) = orphan.project_path.as_deref() else {
                report.skipped.push(PruneSkip {
                    message: "Owning project is unknown".to_string(),
                    path: orphan.path,
                    error: ErrorCode::WorktreeFailed,
                });
                continue;
            };
            match provider.remove_checkout(project_path, &orphan.path) {
                Ok(()) => {
                    if let Some(session_id) = &orphan.session_id {
                        self.forget_working_copy(session_id, &orphan.path)?;
                    }
                    self.audit.record_quietly(
                        AuditEvent::CheckoutPruned,
                        orphan.session_id.as_deref().unwrap_or(SYSTEM_ACTOR),
                        json!({ "path": orphan.path, "force": force }),
                    );
                    tracing::info!(path = %orphan.path.display(), "checkout pruned");
                    report.removed.push(orphan.path);
                }
                Err(e) => {
                    tracing::warn!(path = %orphan.path.display(), error = %e, "prune failed");
                    report.skipped.push(PruneSkip {
                        message: format!("{:#}", e),
                        path: orphan.path,
                        error: ErrorCode::WorktreeFailed,
                    });
                }
            }
        }
        Ok(report)
    }

    fn forget_working_copy(&self, session_id: &str, path: &Path) -> CoordResult<()> {
        let mut session = self.sessions.get(session_id)?;
        if session.working_copy.as_ref().is_some_and(|c| c.path == path) {
            session.working_copy = None;
            self.sessions.save(&session)?;
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn move_into(source: &Path, dest_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
    let dest = dest_dir.join(file_name(source));
    std::fs::rename(source, &dest)
        .with_context(|| format!("Failed to archive {}", source.display()))
}

fn sorted_names(dir: &Path) -> anyhow::Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
