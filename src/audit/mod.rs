//! Append-only audit trail of coordinator events.

pub mod logger;

pub use logger::AuditLogger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session id recorded for events not attributable to a session.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    SessionCreated,
    SessionEnded,
    ProjectAdded,
    ProjectSwitched,
    LockClaimed,
    LockReleased,
    LockHeartbeat,
    LocksCleaned,
    Cleanup,
    CheckoutPruned,
    RecordsArchived,
    TaskSubmitted,
    TaskDispatched,
    StageAdvanced,
    StageBlocked,
    TaskCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub session_id: String,
    #[serde(default)]
    pub data: Value,
}

impl AuditEntry {
    pub fn new(event: AuditEvent, session_id: &str, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            session_id: session_id.to_string(),
            data,
        }
    }
}
