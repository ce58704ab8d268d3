//! Isolated per-task checkouts.
//!
//! The coordinator only asks for a checkout directory when a task lease is granted and
//! inspects them during cleanup. How the directory is produced is behind
//! [`CheckoutProvider`]; [`GitCheckouts`] backs it with git worktrees.

pub mod git;

pub use git::GitCheckouts;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInfo {
    pub path: PathBuf,
    pub branch: String,
    pub project_name: String,
    pub task_id: String,
}

pub trait CheckoutProvider: Send + Sync {
    /// Create (or reuse) the checkout for `task_id`.
    fn create_checkout(
        &self,
        project_path: &Path,
        project_name: &str,
        task_id: &str,
    ) -> Result<CheckoutInfo>;

    fn remove_checkout(&self, project_path: &Path, checkout_path: &Path) -> Result<()>;

    /// Unknown or unreadable checkouts report `false`.
    fn has_uncommitted_changes(&self, checkout_path: &Path) -> bool;

    /// Checkouts of `project_path` that this provider manages.
    fn list_checkouts(&self, project_path: &Path) -> Result<Vec<CheckoutInfo>>;
}
