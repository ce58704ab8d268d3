use super::{RegistryEntry, Session, SessionRegistry, SessionStatus, SessionSummary};
use crate::errors::{CoordError, CoordResult};
use crate::store::RecordStore;
use crate::util::{generate_id, sanitize_component};
use chrono::Utc;

/// Reads and writes session records and keeps the registry index in step.
///
/// None of these methods take the store guard; callers that read-check-write hold it.
#[derive(Debug, Clone)]
pub struct SessionManager {
    store: RecordStore,
    ttl_hours: i64,
}

impl SessionManager {
    pub fn new(store: RecordStore, ttl_hours: i64) -> Self {
        Self { store, ttl_hours }
    }

    pub fn ttl_hours(&self) -> i64 {
        self.ttl_hours
    }

    fn registry(&self) -> SessionRegistry {
        self.store
            .read_or_default(&self.store.layout().sessions_registry())
    }

    /// Persist a new active session. `id` is generated when absent.
    pub fn create(&self, id: Option<&str>) -> CoordResult<Session> {
        let id = match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => generate_id("SESS"),
        };
        if sanitize_component(&id) != id {
            return Err(CoordError::InvalidArgs(format!(
                "Invalid session id '{}': use letters, digits, '-', '_' or '.'",
                id
            )));
        }
        if self.store.layout().session_file(&id).exists() {
            return Err(CoordError::InvalidArgs(format!(
                "Session {} already exists",
                id
            )));
        }
        let session = Session::new(&id);
        self.save(&session)?;
        Ok(session)
    }

    pub fn get(&self, id: &str) -> CoordResult<Session> {
        self.store
            .read_optional(&self.store.layout().session_file(id))?
            .ok_or_else(|| CoordError::SessionNotFound { id: id.to_string() })
    }

    /// Write the session record and its registry entry.
    pub fn save(&self, session: &Session) -> CoordResult<()> {
        let layout = self.store.layout();
        self.store.write(&layout.session_file(&session.id), session)?;

        let mut registry = self.registry();
        registry
            .sessions
            .insert(session.id.clone(), RegistryEntry::from(session));
        self.store.write(&layout.sessions_registry(), &registry)?;
        Ok(())
    }

    /// The active session with the most recent activity.
    pub fn current_session_id(&self) -> Option<String> {
        self.registry()
            .sessions
            .into_iter()
            .filter(|(_, entry)| entry.status == SessionStatus::Active)
            .max_by_key(|(_, entry)| entry.last_activity)
            .map(|(id, _)| id)
    }

    /// The explicitly named session, else the current one.
    pub fn resolve(&self, explicit: Option<&str>) -> CoordResult<Session> {
        let id = match explicit.filter(|s| !s.trim().is_empty()) {
            Some(id) => id.to_string(),
            None => self.current_session_id().ok_or(CoordError::NoSession)?,
        };
        self.get(&id)
    }

    /// Like [`resolve`](Self::resolve), but an ended session is refused.
    pub fn resolve_active(&self, explicit: Option<&str>) -> CoordResult<Session> {
        let session = self.resolve(explicit)?;
        if !session.is_active() {
            return Err(CoordError::SessionEnded { id: session.id });
        }
        Ok(session)
    }

    /// Bump last-activity and persist.
    pub fn touch(&self, session: &mut Session) -> CoordResult<()> {
        session.last_activity = Utc::now();
        self.save(session)
    }

    pub fn mark_ended(&self, session: &mut Session) -> CoordResult<()> {
        let now = Utc::now();
        session.status = SessionStatus::Ended;
        session.ended_at = Some(now);
        session.locks.clear();
        self.save(session)
    }

    /// Sessions newest first; ended ones only when `include_ended`.
    pub fn list(&self, include_ended: bool) -> Vec<SessionSummary> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = self
            .registry()
            .sessions
            .keys()
            .filter_map(|id| self.get(id).ok())
            .filter(|s| include_ended || s.is_active())
            .collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        sessions
            .into_iter()
            .map(|session| SessionSummary {
                is_old: session.is_active() && session.is_old(self.ttl_hours, now),
                session,
            })
            .collect()
    }

    /// Active sessions idle beyond the TTL.
    pub fn old_sessions(&self) -> Vec<Session> {
        let now = Utc::now();
        self.list(false)
            .into_iter()
            .map(|summary| summary.session)
            .filter(|s| s.is_old(self.ttl_hours, now))
            .collect()
    }
}
