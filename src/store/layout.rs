//! On-disk layout of a switchyard root.
//!
//! ```text
//! .switchyard/
//! ├── switchyard.toml        # Configuration
//! ├── registry/
//! │   └── projects.json      # Project registry
//! ├── state/
//! │   ├── sessions.json      # Sessions registry index
//! │   ├── sessions/<id>.json # One file per session
//! │   ├── locks.json         # All leases
//! │   ├── pending/<role>.json# One bounded queue per worker role
//! │   ├── progress/          # Progress records and handoffs
//! │   ├── inbox/             # File-drop submissions
//! │   ├── archive/<YYYY-MM>/ # Finished progress records and handoffs
//! │   ├── active_tasks.json  # Orchestrator assignment registry
//! │   └── audit.log          # JSONL audit trail
//! └── logs/                  # Rolling orchestrator logs
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The name of the switchyard state directory.
pub const SWITCHYARD_DIR: &str = ".switchyard";

/// Resolved paths for every document the coordinator persists.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

/// Result of initializing a switchyard root.
#[derive(Debug)]
pub struct InitResult {
    pub base_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

impl StateLayout {
    /// Layout rooted at `<project_dir>/.switchyard`.
    pub fn new(project_dir: &Path) -> Self {
        Self {
            root: project_dir.join(SWITCHYARD_DIR),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("switchyard.toml")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir().join("sessions")
    }

    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", session_id))
    }

    pub fn sessions_registry(&self) -> PathBuf {
        self.state_dir().join("sessions.json")
    }

    pub fn locks_file(&self) -> PathBuf {
        self.state_dir().join("locks.json")
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.state_dir().join("pending")
    }

    pub fn queue_file(&self, role: &str) -> PathBuf {
        self.pending_dir().join(format!("{}.json", role))
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.state_dir().join("progress")
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.state_dir().join("inbox")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.state_dir().join("archive")
    }

    /// Monthly archive bucket, `month` formatted `YYYY-MM`.
    pub fn archive_month_dir(&self, month: &str) -> PathBuf {
        self.archive_dir().join(month)
    }

    pub fn active_tasks_file(&self) -> PathBuf {
        self.state_dir().join("active_tasks.json")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.state_dir().join("audit.log")
    }

    pub fn projects_file(&self) -> PathBuf {
        self.registry_dir().join("projects.json")
    }

    /// Advisory lock file guarding read-check-write sequences.
    pub fn guard_file(&self) -> PathBuf {
        self.state_dir().join(".coordinator.lock")
    }

    pub fn is_initialized(&self) -> bool {
        self.root.exists()
    }

    /// Create the directory structure; idempotent.
    pub fn init(&self) -> Result<InitResult> {
        let created = !self.root.exists();
        self.ensure_directories()?;
        Ok(InitResult {
            base_dir: self.root.clone(),
            created,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.state_dir(),
            self.registry_dir(),
            self.log_dir(),
            self.sessions_dir(),
            self.pending_dir(),
            self.progress_dir(),
            self.inbox_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
