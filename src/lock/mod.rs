//! Time-bounded exclusive leases over projects and tasks.
//!
//! At most one live lease exists per project id and per task id: a claim collides with
//! any live lease carrying the same project or the same task, whoever owns it. Expiry is checked lazily by every reader and persisted by
//! [`LockCoordinator::cleanup_locks`].

pub mod coordinator;

pub use coordinator::{
    ClaimGrant, ClaimRequest, CleanupLocksOutcome, EndedSession, HeartbeatOutcome,
    LockCoordinator, LockExtension, ReleaseOutcome, ReleaseRequest,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    Active,
    Expired,
    Released,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: LockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Lock {
    /// Active and not yet past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == LockStatus::Active && self.expires_at > now
    }

    /// Status as a reader should treat it, accounting for lazy expiry.
    pub fn effective_status(&self, now: DateTime<Utc>) -> LockStatus {
        match self.status {
            LockStatus::Active if self.expires_at <= now => LockStatus::Expired,
            other => other,
        }
    }

    /// Whether a new lease on (`project_id`, `task_id`) would collide with this one.
    pub fn covers(&self, project_id: Option<&str>, task_id: Option<&str>) -> bool {
        let same_project = project_id.is_some() && self.project_id.as_deref() == project_id;
        let same_task = task_id.is_some() && self.task_id.as_deref() == task_id;
        same_project || same_task
    }

    pub fn release(&mut self, now: DateTime<Utc>) {
        self.status = LockStatus::Released;
        self.released_at = Some(now);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocksFile {
    #[serde(default)]
    pub locks: Vec<Lock>,
}

impl LocksFile {
    /// The first live lease that a new claim on (`project_id`, `task_id`) would collide with.
    pub fn find_conflict(
        &self,
        project_id: Option<&str>,
        task_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<&Lock> {
        self.locks
            .iter()
            .find(|lock| lock.is_live(now) && lock.covers(project_id, task_id))
    }

    /// Mark lapsed active locks expired. With `force_cutoff`, active locks acquired
    /// before the cutoff are expired too. Returns `(expired, force_expired)` ids.
    pub fn sweep(
        &mut self,
        now: DateTime<Utc>,
        force_cutoff: Option<DateTime<Utc>>,
    ) -> (Vec<String>, Vec<String>) {
        let mut expired = Vec::new();
        let mut forced = Vec::new();
        for lock in self.locks.iter_mut().filter(|l| l.status == LockStatus::Active) {
            if lock.expires_at <= now {
                lock.status = LockStatus::Expired;
                expired.push(lock.id.clone());
            } else if force_cutoff.is_some_and(|cutoff| lock.acquired_at < cutoff) {
                lock.status = LockStatus::Expired;
                forced.push(lock.id.clone());
            }
        }
        (expired, forced)
    }

    /// Release every active lock owned by `owner_id`. Returns the released ids.
    pub fn release_owned(&mut self, owner_id: &str, now: DateTime<Utc>) -> Vec<String> {
        let mut released = Vec::new();
        for lock in self
            .locks
            .iter_mut()
            .filter(|l| l.owner_id == owner_id && l.status == LockStatus::Active)
        {
            lock.release(now);
            released.push(lock.id.clone());
        }
        released
    }

    pub fn live_owned_by(&self, owner_id: &str, now: DateTime<Utc>) -> Vec<&Lock> {
        self.locks
            .iter()
            .filter(|l| l.owner_id == owner_id && l.is_live(now))
            .collect()
    }
}

/// Cutoff for a forced sweep: locks acquired more than `hours` ago.
pub fn force_cutoff(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now - Duration::hours(hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(id: &str, project: Option<&str>, task: Option<&str>, minutes: i64) -> Lock {
        let now = Utc::now();
        Lock {
            id: id.to_string(),
            project_id: project.map(str::to_string),
            task_id: task.map(str::to_string),
            owner_id: "SESS-1".to_string(),
            acquired_at: now,
            expires_at: now + Duration::minutes(minutes),
            status: LockStatus::Active,
            released_at: None,
            last_heartbeat: None,
        }
    }

    #[test]
    fn test_task_lock_conflicts() {
        let held = lock("L1", Some("P"), Some("T1"), 60);
        assert!(held.covers(Some("P"), Some("T1")));
        assert!(held.covers(None, Some("T1")));
        // Another task on the same project still shares the project key.
        assert!(held.covers(Some("P"), Some("T2")));
        assert!(held.covers(Some("P"), None));
        assert!(!held.covers(Some("Q"), None));
        assert!(!held.covers(Some("Q"), Some("T2")));
        assert!(!held.covers(None, Some("T2")));
    }

    #[test]
    fn test_project_lock_conflicts() {
        let held = lock("L1", Some("P"), None, 60);
        assert!(held.covers(Some("P"), None));
        assert!(held.covers(Some("P"), Some("T1")));
        assert!(!held.covers(None, Some("T1")));
        assert!(!held.covers(Some("Q"), Some("T1")));
    }

    #[test]
    fn test_one_live_lease_per_key() {
        let now = Utc::now();
        let file = LocksFile {
            locks: vec![lock("L1", Some("P"), Some("T1"), 60)],
        };
        let conflict = file.find_conflict(Some("P"), Some("T2"), now).unwrap();
        assert_eq!(conflict.id, "L1");
        assert!(file.find_conflict(Some("Q"), Some("T2"), now).is_none());
    }

    #[test]
    fn test_expired_lock_is_inert() {
        let now = Utc::now();
        let file = LocksFile {
            locks: vec![lock("L1", Some("P"), None, -1)],
        };
        assert!(file.find_conflict(Some("P"), None, now).is_none());
        assert_eq!(file.locks[0].effective_status(now), LockStatus::Expired);
    }

    #[test]
    fn test_sweep_expires_lapsed_and_forced() {
        let now = Utc::now();
        let mut old = lock("OLD", Some("P"), None, 60);
        old.acquired_at = now - Duration::hours(30);
        let mut file = LocksFile {
            locks: vec![lock("LAPSED", Some("Q"), None, -5), old, lock("FRESH", Some("R"), None, 60)],
        };

        let (expired, forced) = file.sweep(now, None);
        assert_eq!(expired, vec!["LAPSED"]);
        assert!(forced.is_empty());

        let (expired, forced) = file.sweep(now, Some(force_cutoff(now, 24)));
        assert!(expired.is_empty());
        assert_eq!(forced, vec!["OLD"]);
        assert_eq!(file.locks[2].status, LockStatus::Active);
    }

    #[test]
    fn test_release_owned() {
        let now = Utc::now();
        let mut other = lock("L3", None, Some("T3"), 60);
        other.owner_id = "SESS-2".into();
        let mut file = LocksFile {
            locks: vec![lock("L1", None, Some("T1"), 60), lock("L2", None, Some("T2"), 60), other],
        };
        let released = file.release_owned("SESS-1", now);
        assert_eq!(released, vec!["L1", "L2"]);
        assert_eq!(file.locks[2].status, LockStatus::Active);
        assert!(file.live_owned_by("SESS-1", now).is_empty());
    }
}
