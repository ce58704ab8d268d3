//! Worker roles and the worker lifecycle seam.
//!
//! Roles form a closed set: workflow stages deserialize straight into [`WorkerRole`], so
//! a misspelled stage in `switchyard.toml` is rejected when the configuration loads
//! rather than when a task reaches it.

pub mod tmux;

pub use tmux::TmuxLauncher;

use crate::errors::CoordError;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A worker role. Each role owns one bounded queue and at most one in-flight task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    Backend,
    Frontend,
    /// The reserved stage whose confidence gates advancement.
    #[serde(alias = "review-git")]
    Review,
    Qa,
    Integrate,
    Verify,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 6] = [
        WorkerRole::Backend,
        WorkerRole::Frontend,
        WorkerRole::Review,
        WorkerRole::Qa,
        WorkerRole::Integrate,
        WorkerRole::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Backend => "backend",
            WorkerRole::Frontend => "frontend",
            WorkerRole::Review => "review",
            WorkerRole::Qa => "qa",
            WorkerRole::Integrate => "integrate",
            WorkerRole::Verify => "verify",
        }
    }

    pub fn is_review(&self) -> bool {
        matches!(self, WorkerRole::Review)
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerRole {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backend" => Ok(WorkerRole::Backend),
            "frontend" => Ok(WorkerRole::Frontend),
            "review" | "review-git" => Ok(WorkerRole::Review),
            "qa" => Ok(WorkerRole::Qa),
            "integrate" => Ok(WorkerRole::Integrate),
            "verify" => Ok(WorkerRole::Verify),
            _ => Err(CoordError::UnknownRole(s.to_string())),
        }
    }
}

/// Outcome of asking the lifecycle collaborator to start a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SpawnStatus {
    Running,
    Exists,
    Error { message: String },
}

/// Worker process lifecycle. Spawning and teardown live outside the coordinator; this
/// is the only surface it sees.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn spawn(&self, role: WorkerRole) -> SpawnStatus;
    async fn kill(&self, role: WorkerRole) -> Result<()>;
    async fn is_running(&self, role: WorkerRole) -> bool;
    /// Deliver a work instruction to a running worker.
    async fn dispatch(&self, role: WorkerRole, instruction: &str) -> Result<()>;
}
