//! Typed error hierarchy for the Switchyard coordinator.
//!
//! Every coordinator operation returns `Result<T, CoordError>`. Each variant maps to a
//! stable machine code (`ErrorCode`) so that callers and scripts can branch on the code
//! rather than on message text. The CLI turns any result into a [`Reply`] envelope:
//!
//! ```json
//! { "success": false, "error": "LOCKED", "message": "...", "conflictingLock": { ... } }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Stable machine codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoSession,
    SessionNotFound,
    SessionRequired,
    ActiveLocks,
    Locked,
    LockNotFound,
    NotOwner,
    QueueFull,
    AgentNotInPipeline,
    ConfidenceBelowThreshold,
    WorkflowNotFound,
    EmptyPipeline,
    UnknownRole,
    ProjectNotFound,
    DuplicateProject,
    InvalidPath,
    WorktreeFailed,
    UncommittedChanges,
    MissingArgs,
    InvalidArgs,
    StoreFailed,
    ConfigInvalid,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoSession => "NO_SESSION",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::SessionRequired => "SESSION_REQUIRED",
            ErrorCode::ActiveLocks => "ACTIVE_LOCKS",
            ErrorCode::Locked => "LOCKED",
            ErrorCode::LockNotFound => "LOCK_NOT_FOUND",
            ErrorCode::NotOwner => "NOT_OWNER",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::AgentNotInPipeline => "AGENT_NOT_IN_PIPELINE",
            ErrorCode::ConfidenceBelowThreshold => "CONFIDENCE_BELOW_THRESHOLD",
            ErrorCode::WorkflowNotFound => "WORKFLOW_NOT_FOUND",
            ErrorCode::EmptyPipeline => "EMPTY_PIPELINE",
            ErrorCode::UnknownRole => "UNKNOWN_ROLE",
            ErrorCode::ProjectNotFound => "PROJECT_NOT_FOUND",
            ErrorCode::DuplicateProject => "DUPLICATE_PROJECT",
            ErrorCode::InvalidPath => "INVALID_PATH",
            ErrorCode::WorktreeFailed => "WORKTREE_FAILED",
            ErrorCode::UncommittedChanges => "UNCOMMITTED_CHANGES",
            ErrorCode::MissingArgs => "MISSING_ARGS",
            ErrorCode::InvalidArgs => "INVALID_ARGS",
            ErrorCode::StoreFailed => "STORE_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the coordination layer.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("No active session. Run \"switchyard session start\" first.")]
    NoSession,

    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("Session {id} has ended. Start a new session to take leases.")]
    SessionEnded { id: String },

    #[error("Session ID required")]
    SessionRequired,

    #[error("Session has {count} active lock(s). Use --force to end anyway.")]
    ActiveLocks { count: usize },

    #[error("Resource already locked by {owner_id} until {expires_at}")]
    Locked {
        lock_id: String,
        owner_id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Lock '{id}' not found")]
    LockNotFound { id: String },

    #[error("You do not own lock '{lock_id}'")]
    NotOwner { lock_id: String },

    #[error("Queue for {role} is full (max {max_length})")]
    QueueFull { role: String, max_length: usize },

    #[error("Stage '{stage}' is not part of workflow '{workflow}'")]
    AgentNotInPipeline { stage: String, workflow: String },

    #[error("Review confidence {confidence} is below threshold {threshold}")]
    ConfidenceBelowThreshold { confidence: f64, threshold: f64 },

    #[error("Workflow '{name}' not found and no default workflow is configured")]
    WorkflowNotFound { name: String },

    #[error("Workflow '{name}' has an empty pipeline")]
    EmptyPipeline { name: String },

    #[error("Unknown worker role '{0}'")]
    UnknownRole(String),

    #[error("Project '{0}' not found")]
    ProjectNotFound(String),

    #[error("Project '{0}' already exists")]
    DuplicateProject(String),

    #[error("Project path does not exist: {0}")]
    InvalidPath(String),

    #[error("Failed to create worktree: {0}")]
    WorktreeFailed(String),

    #[error("Worktree {0} has uncommitted changes. Use --force to remove anyway.")]
    UncommittedChanges(String),

    #[error("{0}")]
    MissingArgs(String),

    #[error("{0}")]
    InvalidArgs(String),

    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Record store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl CoordError {
    /// The stable machine code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordError::NoSession => ErrorCode::NoSession,
            CoordError::SessionNotFound { .. } | CoordError::SessionEnded { .. } => {
                ErrorCode::SessionNotFound
            }
            CoordError::SessionRequired => ErrorCode::SessionRequired,
            CoordError::ActiveLocks { .. } => ErrorCode::ActiveLocks,
            CoordError::Locked { .. } => ErrorCode::Locked,
            CoordError::LockNotFound { .. } => ErrorCode::LockNotFound,
            CoordError::NotOwner { .. } => ErrorCode::NotOwner,
            CoordError::QueueFull { .. } => ErrorCode::QueueFull,
            CoordError::AgentNotInPipeline { .. } => ErrorCode::AgentNotInPipeline,
            CoordError::ConfidenceBelowThreshold { .. } => ErrorCode::ConfidenceBelowThreshold,
            CoordError::WorkflowNotFound { .. } => ErrorCode::WorkflowNotFound,
            CoordError::EmptyPipeline { .. } => ErrorCode::EmptyPipeline,
            CoordError::UnknownRole(_) => ErrorCode::UnknownRole,
            CoordError::ProjectNotFound(_) => ErrorCode::ProjectNotFound,
            CoordError::DuplicateProject(_) => ErrorCode::DuplicateProject,
            CoordError::InvalidPath(_) => ErrorCode::InvalidPath,
            CoordError::WorktreeFailed(_) => ErrorCode::WorktreeFailed,
            CoordError::UncommittedChanges(_) => ErrorCode::UncommittedChanges,
            CoordError::MissingArgs(_) => ErrorCode::MissingArgs,
            CoordError::InvalidArgs(_) => ErrorCode::InvalidArgs,
            CoordError::ConfigInvalid(_) => ErrorCode::ConfigInvalid,
            CoordError::Store(_) => ErrorCode::StoreFailed,
        }
    }

    /// Structured payload that accompanies the code, if any.
    pub fn details(&self) -> Option<Value> {
        match self {
            CoordError::Locked {
                lock_id,
                owner_id,
                expires_at,
            } => Some(json!({
                "conflictingLock": {
                    "lockId": lock_id,
                    "ownerId": owner_id,
                    "expiresAt": expires_at,
                }
            })),
            CoordError::ConfidenceBelowThreshold {
                confidence,
                threshold,
            } => Some(json!({
                "confidence": confidence,
                "threshold": threshold,
                "suggestion": "block_and_notify",
            })),
            CoordError::QueueFull { role, max_length } => Some(json!({
                "role": role,
                "maxLength": max_length,
            })),
            CoordError::ActiveLocks { count } => Some(json!({ "activeLocks": count })),
            _ => None,
        }
    }
}

pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// The `{success, error?, message, ...payload}` envelope every command yields.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    pub message: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Reply {
    /// A successful reply. `payload` must serialize to a JSON object; anything else is
    /// nested under `data`.
    pub fn ok(message: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            success: true,
            error: None,
            message: message.into(),
            payload: into_object(payload),
        }
    }

    pub fn ok_message(message: impl Into<String>) -> Self {
        Self::ok(message, Map::new())
    }

    pub fn from_error(err: &CoordError) -> Self {
        let payload = match err.details() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            success: false,
            error: Some(err.code()),
            message: err.to_string(),
            payload,
        }
    }

    /// Collapse a coordinator result into a reply.
    pub fn from_result<T, F>(result: CoordResult<T>, on_ok: F) -> Self
    where
        F: FnOnce(T) -> Reply,
    {
        match result {
            Ok(value) => on_ok(value),
            Err(err) => Self::from_error(&err),
        }
    }
}

fn into_object(payload: impl Serialize) -> Map<String, Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => Map::new(),
        Ok(other) => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
        Err(e) => {
            let mut map = Map::new();
            map.insert("serializationError".to_string(), Value::String(e.to_string()));
            map
        }
    }
}
