use super::{Lock, LockStatus, LocksFile, force_cutoff};
use crate::audit::{AuditEvent, AuditLogger, SYSTEM_ACTOR};
use crate::checkout::{CheckoutInfo, CheckoutProvider};
use crate::errors::{CoordError, CoordResult};
use crate::project::{Project, ProjectRegistry};
use crate::session::{Session, SessionManager, SessionProject, WorkingCopy};
use crate::store::RecordStore;
use crate::util::generate_id;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ClaimRequest {
    /// Project id or name; defaults to the session's project
    pub project: Option<String>,
    pub task: Option<String>,
    pub session: Option<String>,
    pub ttl_minutes: Option<i64>,
    /// Skip checkout provisioning for task claims
    pub no_checkout: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimGrant {
    pub lock: Lock,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<SessionProject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseRequest {
    pub lock: Option<String>,
    pub all: bool,
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOutcome {
    pub session_id: String,
    pub released: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockExtension {
    pub lock_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatOutcome {
    pub session_id: String,
    pub extended: Vec<LockExtension>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupLocksOutcome {
    pub expired: Vec<String>,
    pub force_expired: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedSession {
    pub session_id: String,
    pub released: Vec<String>,
}

/// Owns sessions and leases. Every read-check-write runs under the store guard, so
/// conflict detection and lease creation are atomic across processes.
#[derive(Clone)]
pub struct LockCoordinator {
    store: RecordStore,
    sessions: SessionManager,
    projects: ProjectRegistry,
    checkouts: Option<Arc<dyn CheckoutProvider>>,
    audit: AuditLogger,
    default_ttl_minutes: i64,
    force_expire_hours: i64,
}

impl LockCoordinator {
    pub fn new(
        store: RecordStore,
        sessions: SessionManager,
        default_ttl_minutes: i64,
        force_expire_hours: i64,
    ) -> Self {
        let audit = AuditLogger::new(&store.layout().audit_log());
        let projects = ProjectRegistry::new(store.clone());
        Self {
            store,
            sessions,
            projects,
            checkouts: None,
            audit,
            default_ttl_minutes,
            force_expire_hours,
        }
    }

    pub fn with_checkouts(mut self, checkouts: Arc<dyn CheckoutProvider>) -> Self {
        self.checkouts = Some(checkouts);
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn load_locks(&self) -> LocksFile {
        self.store.read_or_default(&self.store.layout().locks_file())
    }

    fn save_locks(&self, file: &LocksFile) -> CoordResult<()> {
        self.store.write(&self.store.layout().locks_file(), file)?;
        Ok(())
    }

    pub fn create_session(&self, id: Option<&str>) -> CoordResult<Session> {
        let _guard = self.store.exclusive()?;
        let session = self.sessions.create(id)?;
        tracing::info!(session_id = %session.id, "session created");
        self.audit.record_quietly(
            AuditEvent::SessionCreated,
            &session.id,
            json!({ "sessionId": session.id }),
        );
        Ok(session)
    }

    /// End a session. Held live locks fail the call unless `force`, which releases them.
    pub fn end_session(&self, id: Option<&str>, force: bool) -> CoordResult<EndedSession> {
        let _guard = self.store.exclusive()?;
        let mut session = self.sessions.resolve(id)?;
        let now = Utc::now();
        let mut locks = self.load_locks();

        let live = locks.live_owned_by(&session.id, now).len();
        if live > 0 && !force {
            return Err(CoordError::ActiveLocks { count: live });
        }

        let released = locks.release_owned(&session.id, now);
        if !released.is_empty() {
            self.save_locks(&locks)?;
        }
        self.sessions.mark_ended(&mut session)?;

        tracing::info!(session_id = %session.id, released = released.len(), "session ended");
        self.audit.record_quietly(
            AuditEvent::SessionEnded,
            &session.id,
            json!({ "force": force, "releasedLocks": released }),
        );
        Ok(EndedSession {
            session_id: session.id,
            released,
        })
    }

    /// Resolve the project a claim targets: explicit, else the session's own.
    fn claim_project(&self, request: &ClaimRequest, session: &Session) -> CoordResult<Option<SessionProject>> {
        if let Some(project) = request.project.as_deref().filter(|p| !p.trim().is_empty()) {
            return self
                .projects
                .resolve(project)
                .map(|p| Some(p.as_session_project()));
        }
        let Some(attached) = &session.project else {
            return Ok(None);
        };
        // The registry may have moved on since the session attached; prefer its view.
        Ok(Some(
            self.projects
                .resolve(&attached.id)
                .map(|p: Project| p.as_session_project())
                .unwrap_or_else(|_| attached.clone()),
        ))
    }

    pub fn claim(&self, request: ClaimRequest) -> CoordResult<ClaimGrant> {
        let ttl = request.ttl_minutes.unwrap_or(self.default_ttl_minutes);
        if ttl <= 0 {
            return Err(CoordError::InvalidArgs(format!(
                "TTL must be positive, got {}",
                ttl
            )));
        }
        let task = request
            .task
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let _guard = self.store.exclusive()?;
        let mut session = self.sessions.resolve_active(request.session.as_deref())?;
        let project = self.claim_project(&request, &session)?;

        if project.is_none() && task.is_none() {
            return Err(CoordError::MissingArgs(
                "Specify a project or task to lock".to_string(),
            ));
        }

        let now = Utc::now();
        let mut locks = self.load_locks();
        let project_id = project.as_ref().map(|p| p.id.as_str());
        if let Some(conflict) = locks.find_conflict(project_id, task.as_deref(), now) {
            tracing::warn!(
                lock_id = %conflict.id,
                owner = %conflict.owner_id,
                "claim refused: resource locked"
            );
            return Err(CoordError::Locked {
                lock_id: conflict.id.clone(),
                owner_id: conflict.owner_id.clone(),
                expires_at: conflict.expires_at,
            });
        }

        let checkout = match (&task, &project, &self.checkouts) {
            (Some(task), Some(project), Some(provider)) if !request.no_checkout => Some(
                provider
                    .create_checkout(&project.path, &project.name, task)
                    .map_err(|e| CoordError::WorktreeFailed(format!("{:#}", e)))?,
            ),
            _ => None,
        };

        let lock = Lock {
            id: generate_id("LOCK"),
            project_id: project_id.map(str::to_string),
            task_id: task.clone(),
            owner_id: session.id.clone(),
            acquired_at: now,
            expires_at: now + Duration::minutes(ttl),
            status: LockStatus::Active,
            released_at: None,
            last_heartbeat: None,
        };
        locks.locks.push(lock.clone());
        self.save_locks(&locks)?;

        if task.is_some() {
            session.current_task = task.clone();
        }
        if session.project.is_none() {
            session.project = project.clone();
        }
        if let Some(info) = &checkout {
            session.working_copy = Some(WorkingCopy {
                path: info.path.clone(),
                branch: info.branch.clone(),
                created_at: now,
            });
        }
        session.locks.push(lock.id.clone());
        self.sessions.touch(&mut session)?;

        tracing::info!(lock_id = %lock.id, session_id = %session.id, ?project_id, task = ?task, "lock claimed");
        self.audit.record_quietly(
            AuditEvent::LockClaimed,
            &session.id,
            json!({
                "lockId": lock.id,
                "projectId": lock.project_id,
                "taskId": lock.task_id,
                "expiresAt": lock.expires_at,
            }),
        );

        Ok(ClaimGrant {
            lock,
            session_id: session.id,
            project,
            checkout,
        })
    }

    pub fn release(&self, request: ReleaseRequest) -> CoordResult<ReleaseOutcome> {
        if request.lock.is_none() && !request.all {
            return Err(CoordError::MissingArgs(
                "Specify --lock <id> or --all".to_string(),
            ));
        }

        let _guard = self.store.exclusive()?;
        let mut session = self.sessions.resolve(request.session.as_deref())?;
        let now = Utc::now();
        let mut locks = self.load_locks();

        let released = match request.lock.as_deref() {
            Some(lock_id) if !request.all => {
                let lock = locks
                    .locks
                    .iter_mut()
                    .find(|l| l.id == lock_id)
                    .ok_or_else(|| CoordError::LockNotFound {
                        id: lock_id.to_string(),
                    })?;
                if lock.owner_id != session.id {
                    return Err(CoordError::NotOwner {
                        lock_id: lock_id.to_string(),
                    });
                }
                if lock.status == LockStatus::Active {
                    lock.release(now);
                    vec![lock.id.clone()]
                } else {
                    Vec::new()
                }
            }
            _ => locks.release_owned(&session.id, now),
        };

        self.save_locks(&locks)?;
        match request.lock.as_deref() {
            Some(lock_id) if !request.all => session.locks.retain(|id| id != lock_id),
            _ => session.locks.clear(),
        }
        self.sessions.touch(&mut session)?;

        tracing::info!(session_id = %session.id, count = released.len(), "locks released");
        self.audit.record_quietly(
            AuditEvent::LockReleased,
            &session.id,
            json!({ "released": released }),
        );

        let count = released.len();
        Ok(ReleaseOutcome {
            session_id: session.id,
            released,
            count,
        })
    }

    /// Extend the session's live locks (or just `lock`) to at least `now + ttl`.
    pub fn heartbeat(
        &self,
        session: Option<&str>,
        lock: Option<&str>,
        ttl_minutes: Option<i64>,
    ) -> CoordResult<HeartbeatOutcome> {
        let ttl = Duration::minutes(ttl_minutes.unwrap_or(self.default_ttl_minutes));
        let _guard = self.store.exclusive()?;
        let mut session = self.sessions.resolve_active(session)?;
        let now = Utc::now();
        let mut locks = self.load_locks();

        if let Some(lock_id) = lock {
            let found = locks
                .locks
                .iter()
                .find(|l| l.id == lock_id)
                .ok_or_else(|| CoordError::LockNotFound {
                    id: lock_id.to_string(),
                })?;
            if found.owner_id != session.id {
                return Err(CoordError::NotOwner {
                    lock_id: lock_id.to_string(),
                });
            }
        }

        let mut extended = Vec::new();
        for held in locks.locks.iter_mut().filter(|l| {
            l.owner_id == session.id && l.is_live(now) && lock.is_none_or(|id| l.id == id)
        }) {
            held.expires_at = held.expires_at.max(now + ttl);
            held.last_heartbeat = Some(now);
            extended.push(LockExtension {
                lock_id: held.id.clone(),
                expires_at: held.expires_at,
            });
        }

        if !extended.is_empty() {
            self.save_locks(&locks)?;
        }
        self.sessions.touch(&mut session)?;

        tracing::debug!(session_id = %session.id, extended = extended.len(), "heartbeat");
        self.audit.record_quietly(
            AuditEvent::LockHeartbeat,
            &session.id,
            json!({ "extended": extended.iter().map(|e| &e.lock_id).collect::<Vec<_>>() }),
        );
        Ok(HeartbeatOutcome {
            session_id: session.id,
            extended,
        })
    }

    /// Persist lazy expiry. `force` also expires locks older than the force horizon.
    pub fn cleanup_locks(&self, force: bool) -> CoordResult<CleanupLocksOutcome> {
        let _guard = self.store.exclusive()?;
        let now = Utc::now();
        let mut locks = self.load_locks();
        let cutoff = force.then(|| force_cutoff(now, self.force_expire_hours));
        let (expired, force_expired) = locks.sweep(now, cutoff);

        if !expired.is_empty() || !force_expired.is_empty() {
            self.save_locks(&locks)?;
            tracing::info!(expired = expired.len(), forced = force_expired.len(), "locks swept");
        }
        self.audit.record_quietly(
            AuditEvent::LocksCleaned,
            SYSTEM_ACTOR,
            json!({ "expired": expired, "forceExpired": force_expired, "force": force }),
        );
        Ok(CleanupLocksOutcome {
            expired,
            force_expired,
        })
    }

    /// Locks with their effective status. Inactive ones only when `include_inactive`.
    pub fn list(&self, include_inactive: bool) -> Vec<Lock> {
        let now = Utc::now();
        self.load_locks()
            .locks
            .into_iter()
            .map(|mut lock| {
                lock.status = lock.effective_status(now);
                lock
            })
            .filter(|lock| include_inactive || lock.status == LockStatus::Active)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::CheckoutInfo;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeCheckouts {
        fail: bool,
        created: Mutex<Vec<String>>,
    }

    impl CheckoutProvider for FakeCheckouts {
        fn create_checkout(
            &self,
            project_path: &Path,
            project_name: &str,
            task_id: &str,
        ) -> anyhow::Result<CheckoutInfo> {
            if self.fail {
                anyhow::bail!("not a git repository");
            }
            self.created.lock().unwrap().push(task_id.to_string());
            Ok(CheckoutInfo {
                path: project_path.join("wt").join(task_id),
                branch: format!("feature/{}", task_id),
                project_name: project_name.to_string(),
                task_id: task_id.to_string(),
            })
        }

        fn remove_checkout(&self, _project_path: &Path, _checkout_path: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        fn has_uncommitted_changes(&self, _checkout_path: &Path) -> bool {
            false
        }

        fn list_checkouts(&self, _project_path: &Path) -> anyhow::Result<Vec<CheckoutInfo>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        coordinator: LockCoordinator,
        projects: ProjectRegistry,
        dir: tempfile::TempDir,
    }

    fn make_coordinator() -> Harness {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.layout().init().unwrap();
        let sessions = SessionManager::new(store.clone(), 24);
        Harness {
            coordinator: LockCoordinator::new(store.clone(), sessions, 120, 24),
            projects: ProjectRegistry::new(store),
            dir,
        }
    }

    fn claim_project(c: &LockCoordinator, project: &str, session: &str) -> CoordResult<ClaimGrant> {
        c.claim(ClaimRequest {
            project: Some(project.into()),
            session: Some(session.into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_claim_requires_session() {
        let h = make_coordinator();
        let err = h
            .coordinator
            .claim(ClaimRequest {
                task: Some("T-1".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CoordError::NoSession));
    }

    #[test]
    fn test_claim_requires_target() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        let err = h.coordinator.claim(ClaimRequest::default()).unwrap_err();
        assert!(matches!(err, CoordError::MissingArgs(_)));
    }

    #[test]
    fn test_second_claim_on_project_is_locked() {
        let h = make_coordinator();
        let project = h.projects.add("web", h.dir.path(), None).unwrap();
        h.coordinator.create_session(Some("S1")).unwrap();
        h.coordinator.create_session(Some("S2")).unwrap();

        let grant = claim_project(&h.coordinator, "web", "S1").unwrap();
        let ttl = grant.lock.expires_at - grant.lock.acquired_at;
        assert_eq!(ttl, Duration::minutes(120));
        assert_eq!(grant.lock.project_id.as_deref(), Some(project.id.as_str()));

        // Resolved by id or name, the conflict is on the same project.
        let err = claim_project(&h.coordinator, &project.id, "S2").unwrap_err();
        match err {
            CoordError::Locked { owner_id, lock_id, .. } => {
                assert_eq!(owner_id, "S1");
                assert_eq!(lock_id, grant.lock.id);
            }
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn test_task_claims_are_independent() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        h.coordinator.create_session(Some("S2")).unwrap();
        let claim = |task: &str, session: &str| {
            h.coordinator.claim(ClaimRequest {
                task: Some(task.into()),
                session: Some(session.into()),
                ..Default::default()
            })
        };
        claim("T-1", "S1").unwrap();
        claim("T-2", "S2").unwrap();
        assert!(matches!(
            claim("T-1", "S2").unwrap_err(),
            CoordError::Locked { .. }
        ));
        assert_eq!(h.coordinator.list(false).len(), 2);
    }

    #[test]
    fn test_second_task_on_same_project_is_locked() {
        let h = make_coordinator();
        let project = h.projects.add("web", h.dir.path(), None).unwrap();
        h.coordinator.create_session(Some("S1")).unwrap();
        h.coordinator.create_session(Some("S2")).unwrap();
        let claim = |task: &str, session: &str| {
            h.coordinator.claim(ClaimRequest {
                project: Some("web".into()),
                task: Some(task.into()),
                session: Some(session.into()),
                no_checkout: true,
                ..Default::default()
            })
        };

        let first = claim("T1", "S1").unwrap();
        match claim("T2", "S2").unwrap_err() {
            CoordError::Locked { lock_id, owner_id, .. } => {
                assert_eq!(lock_id, first.lock.id);
                assert_eq!(owner_id, "S1");
            }
            other => panic!("expected Locked, got {other:?}"),
        }

        let live_on_project = h
            .coordinator
            .list(false)
            .into_iter()
            .filter(|l| l.project_id.as_deref() == Some(project.id.as_str()))
            .count();
        assert_eq!(live_on_project, 1);
    }

    #[test]
    fn test_ended_session_cannot_claim_or_heartbeat() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        h.coordinator.end_session(Some("S1"), false).unwrap();

        let err = h
            .coordinator
            .claim(ClaimRequest {
                task: Some("T-1".into()),
                session: Some("S1".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CoordError::SessionEnded { .. }));
        assert!(h.coordinator.list(true).is_empty());

        let err = h.coordinator.heartbeat(Some("S1"), None, None).unwrap_err();
        assert!(matches!(err, CoordError::SessionEnded { .. }));
    }

    #[test]
    fn test_claim_updates_session() {
        let h = make_coordinator();
        h.projects.add("web", h.dir.path(), None).unwrap();
        h.coordinator.create_session(Some("S1")).unwrap();
        let checkouts = Arc::new(FakeCheckouts::default());
        let coordinator = h.coordinator.clone().with_checkouts(checkouts.clone());

        let grant = coordinator
            .claim(ClaimRequest {
                project: Some("web".into()),
                task: Some("T-7".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(grant.checkout.as_ref().unwrap().branch, "feature/T-7");

        let session = coordinator.sessions().get("S1").unwrap();
        assert_eq!(session.current_task.as_deref(), Some("T-7"));
        assert_eq!(session.project.unwrap().name, "web");
        assert_eq!(session.locks, vec![grant.lock.id]);
        assert!(session.working_copy.is_some());
        assert_eq!(checkouts.created.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_checkout_failure_writes_no_lock() {
        let h = make_coordinator();
        h.projects.add("web", h.dir.path(), None).unwrap();
        h.coordinator.create_session(Some("S1")).unwrap();
        let coordinator = h.coordinator.clone().with_checkouts(Arc::new(FakeCheckouts {
            fail: true,
            ..Default::default()
        }));

        let err = coordinator
            .claim(ClaimRequest {
                project: Some("web".into()),
                task: Some("T-1".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CoordError::WorktreeFailed(_)));
        assert!(coordinator.list(true).is_empty());
    }

    #[test]
    fn test_unknown_project_claim() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        assert!(matches!(
            claim_project(&h.coordinator, "ghost", "S1").unwrap_err(),
            CoordError::ProjectNotFound(_)
        ));
    }

    #[test]
    fn test_release_rules() {
        let h = make_coordinator();
        h.projects.add("web", h.dir.path(), None).unwrap();
        h.coordinator.create_session(Some("S1")).unwrap();
        h.coordinator.create_session(Some("S2")).unwrap();
        let grant = claim_project(&h.coordinator, "web", "S1").unwrap();

        let missing = h.coordinator.release(ReleaseRequest {
            session: Some("S1".into()),
            ..Default::default()
        });
        assert!(matches!(missing.unwrap_err(), CoordError::MissingArgs(_)));

        let unknown = h.coordinator.release(ReleaseRequest {
            lock: Some("LOCK-NOPE".into()),
            session: Some("S1".into()),
            ..Default::default()
        });
        assert!(matches!(unknown.unwrap_err(), CoordError::LockNotFound { .. }));

        let not_owner = h.coordinator.release(ReleaseRequest {
            lock: Some(grant.lock.id.clone()),
            session: Some("S2".into()),
            ..Default::default()
        });
        assert!(matches!(not_owner.unwrap_err(), CoordError::NotOwner { .. }));

        let released = h
            .coordinator
            .release(ReleaseRequest {
                lock: Some(grant.lock.id.clone()),
                session: Some("S1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(released.count, 1);
        assert!(h.coordinator.sessions().get("S1").unwrap().locks.is_empty());

        // The project is free again.
        claim_project(&h.coordinator, "web", "S2").unwrap();
    }

    #[test]
    fn test_release_all() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        for task in ["A", "B"] {
            h.coordinator
                .claim(ClaimRequest {
                    task: Some(task.into()),
                    ..Default::default()
                })
                .unwrap();
        }
        let outcome = h
            .coordinator
            .release(ReleaseRequest {
                all: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.count, 2);
        assert!(h.coordinator.list(false).is_empty());
    }

    #[test]
    fn test_heartbeat_never_shortens() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        let grant = h
            .coordinator
            .claim(ClaimRequest {
                task: Some("T".into()),
                ttl_minutes: Some(600),
                ..Default::default()
            })
            .unwrap();

        let outcome = h.coordinator.heartbeat(None, None, Some(5)).unwrap();
        assert_eq!(outcome.extended.len(), 1);
        assert_eq!(outcome.extended[0].expires_at, grant.lock.expires_at);

        let outcome = h.coordinator.heartbeat(None, None, Some(1000)).unwrap();
        assert!(outcome.extended[0].expires_at > grant.lock.expires_at);
    }

    #[test]
    fn test_heartbeat_skips_expired_locks() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        let grant = h
            .coordinator
            .claim(ClaimRequest {
                task: Some("T".into()),
                ..Default::default()
            })
            .unwrap();

        let store = RecordStore::new(h.dir.path());
        let mut locks: LocksFile = store.read_or_default(&store.layout().locks_file());
        locks.locks[0].expires_at = Utc::now() - Duration::minutes(1);
        store.write(&store.layout().locks_file(), &locks).unwrap();

        let outcome = h
            .coordinator
            .heartbeat(None, Some(&grant.lock.id), None)
            .unwrap();
        assert!(outcome.extended.is_empty());
    }

    #[test]
    fn test_cleanup_locks_force() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        h.coordinator
            .claim(ClaimRequest {
                task: Some("OLD".into()),
                ttl_minutes: Some(60 * 48),
                ..Default::default()
            })
            .unwrap();

        let store = RecordStore::new(h.dir.path());
        let mut locks: LocksFile = store.read_or_default(&store.layout().locks_file());
        locks.locks[0].acquired_at = Utc::now() - Duration::hours(25);
        store.write(&store.layout().locks_file(), &locks).unwrap();

        let plain = h.coordinator.cleanup_locks(false).unwrap();
        assert!(plain.expired.is_empty() && plain.force_expired.is_empty());

        let forced = h.coordinator.cleanup_locks(true).unwrap();
        assert_eq!(forced.force_expired.len(), 1);
        assert!(h.coordinator.list(false).is_empty());
    }

    #[test]
    fn test_end_session_with_locks() {
        let h = make_coordinator();
        h.coordinator.create_session(Some("S1")).unwrap();
        h.coordinator
            .claim(ClaimRequest {
                task: Some("T".into()),
                ..Default::default()
            })
            .unwrap();

        let err = h.coordinator.end_session(Some("S1"), false).unwrap_err();
        assert!(matches!(err, CoordError::ActiveLocks { count: 1 }));

        let ended = h.coordinator.end_session(Some("S1"), true).unwrap();
        assert_eq!(ended.released.len(), 1);
        assert!(!h.coordinator.sessions().get("S1").unwrap().is_active());
        assert!(h.coordinator.list(false).is_empty());
    }
}
