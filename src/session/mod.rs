//! Sessions: one actor's unit of work, with its project, task, checkout and held locks.

pub mod manager;

pub use manager::SessionManager;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Version tag of the sessions registry index.
pub const REGISTRY_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProject {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingCopy {
    pub path: PathBuf,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<SessionProject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_copy: Option<WorkingCopy>,
    #[serde(default)]
    pub locks: Vec<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            project: None,
            current_task: None,
            working_copy: None,
            locks: Vec::new(),
            status: SessionStatus::Active,
            created_at: now,
            last_activity: now,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Idle for longer than `ttl_hours` as of `now`.
    pub fn is_old(&self, ttl_hours: i64, now: DateTime<Utc>) -> bool {
        now - self.last_activity > Duration::hours(ttl_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl From<&Session> for RegistryEntry {
    fn from(session: &Session) -> Self {
        Self {
            status: session.status,
            created_at: session.created_at,
            last_activity: session.last_activity,
            project_name: session.project.as_ref().map(|p| p.name.clone()),
        }
    }
}

/// The sessions index: a summary of every session keyed by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRegistry {
    pub version: String,
    #[serde(default)]
    pub sessions: BTreeMap<String, RegistryEntry>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            sessions: BTreeMap::new(),
        }
    }
}

/// A session as shown by `list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub is_old: bool,
}
