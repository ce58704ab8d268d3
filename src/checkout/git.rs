use super::{CheckoutInfo, CheckoutProvider};
use crate::util::sanitize_component;
use anyhow::{Context, Result};
use git2::{
    BranchType, Repository, StatusOptions, WorktreeAddOptions, WorktreePruneOptions,
};
use std::path::{Path, PathBuf};

/// Git worktrees under `<base_dir>/<project>/<task>`, each on its own
/// `<branch_prefix><task>` branch cut from the project's HEAD.
#[derive(Debug, Clone)]
pub struct GitCheckouts {
    base_dir: PathBuf,
    branch_prefix: String,
}

impl GitCheckouts {
    pub fn new(base_dir: &Path, branch_prefix: &str) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            branch_prefix: branch_prefix.to_string(),
        }
    }

    pub fn checkout_path(&self, project_name: &str, task_id: &str) -> PathBuf {
        self.base_dir
            .join(sanitize_component(project_name))
            .join(sanitize_component(task_id))
    }

    pub fn branch_name(&self, task_id: &str) -> String {
        format!("{}{}", self.branch_prefix, sanitize_component(task_id))
    }

    fn open(project_path: &Path) -> Result<Repository> {
        Repository::open(project_path)
            .with_context(|| format!("Not a git repository: {}", project_path.display()))
    }

    fn current_branch(path: &Path) -> String {
        Repository::open(path)
            .ok()
            .and_then(|repo| {
                repo.head()
                    .ok()
                    .and_then(|head| head.shorthand().map(str::to_string))
            })
            .unwrap_or_else(|| "detached".to_string())
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    let a = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let b = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    a == b
}

impl CheckoutProvider for GitCheckouts {
    fn create_checkout(
        &self,
        project_path: &Path,
        project_name: &str,
        task_id: &str,
    ) -> Result<CheckoutInfo> {
        let path = self.checkout_path(project_name, task_id);
        let branch = self.branch_name(task_id);
        let info = CheckoutInfo {
            path: path.clone(),
            branch: branch.clone(),
            project_name: project_name.to_string(),
            task_id: task_id.to_string(),
        };

        if path.exists() {
            tracing::debug!(path = %path.display(), "reusing existing checkout");
            return Ok(info);
        }

        let repo = Self::open(project_path)?;
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .context("Project has no commits to branch from")?;

        let branch_ref = match repo.find_branch(&branch, BranchType::Local) {
            Ok(existing) => existing,
            Err(_) => repo
                .branch(&branch, &head, false)
                .with_context(|| format!("Failed to create branch {}", branch))?,
        };
        let reference = branch_ref.into_reference();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        let worktree_name = sanitize_component(&format!("{}-{}", project_name, task_id));
        repo.worktree(&worktree_name, &path, Some(&opts))
            .with_context(|| format!("Failed to add worktree at {}", path.display()))?;

        tracing::info!(path = %path.display(), %branch, "checkout created");
        Ok(info)
    }

    fn remove_checkout(&self, project_path: &Path, checkout_path: &Path) -> Result<()> {
        let repo = Self::open(project_path)?;
        let names = repo.worktrees().context("Failed to list worktrees")?;

        for name in names.iter().flatten() {
            let Ok(worktree) = repo.find_worktree(name) else {
                continue;
            };
            if !same_path(worktree.path(), checkout_path) {
                continue;
            }
            let mut opts = WorktreePruneOptions::new();
            opts.valid(true).working_tree(true);
            worktree
                .prune(Some(&mut opts))
                .with_context(|| format!("Failed to prune worktree {}", name))?;
            break;
        }

        // A directory libgit2 no longer tracks is still ours to delete.
        if checkout_path.exists() {
            std::fs::remove_dir_all(checkout_path)
                .with_context(|| format!("Failed to remove {}", checkout_path.display()))?;
        }
        Ok(())
    }

    fn has_uncommitted_changes(&self, checkout_path: &Path) -> bool {
        let Ok(repo) = Repository::open(checkout_path) else {
            return false;
        };
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        repo.statuses(Some(&mut opts))
            .map(|statuses| !statuses.is_empty())
            .unwrap_or(false)
    }

    fn list_checkouts(&self, project_path: &Path) -> Result<Vec<CheckoutInfo>> {
        let repo = Self::open(project_path)?;
        let names = repo.worktrees().context("Failed to list worktrees")?;
        let base = self
            .base_dir
            .canonicalize()
            .unwrap_or_else(|_| self.base_dir.clone());

        let mut checkouts = Vec::new();
        for name in names.iter().flatten() {
            let Ok(worktree) = repo.find_worktree(name) else {
                continue;
            };
            let path = worktree.path().to_path_buf();
            let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());
            if !resolved.starts_with(&base) {
                continue;
            }
            let task_id = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let project_name = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            checkouts.push(CheckoutInfo {
                branch: Self::current_branch(&path),
                path,
                project_name,
                task_id,
            });
        }
        Ok(checkouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        fs::write(dir.join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("switchyard", "switchyard@localhost").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }

    #[test]
    fn test_paths_and_branch_names() {
        let checkouts = GitCheckouts::new(Path::new("/wt"), "feature/");
        assert_eq!(
            checkouts.checkout_path("web app", "T-1"),
            PathBuf::from("/wt/web-app/T-1")
        );
        assert_eq!(checkouts.branch_name("T-1"), "feature/T-1");
    }

    #[test]
    fn test_create_list_and_remove() {
        let project = tempdir().unwrap();
        let base = tempdir().unwrap();
        setup_repo(project.path());
        let checkouts = GitCheckouts::new(base.path(), "feature/");

        let info = checkouts
            .create_checkout(project.path(), "web", "T-1")
            .unwrap();
        assert!(info.path.join("README.md").exists());
        assert_eq!(info.branch, "feature/T-1");

        let listed = checkouts.list_checkouts(project.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].task_id, "T-1");
        assert_eq!(listed[0].project_name, "web");

        assert!(!checkouts.has_uncommitted_changes(&info.path));
        fs::write(info.path.join("scratch.txt"), "wip").unwrap();
        assert!(checkouts.has_uncommitted_changes(&info.path));

        checkouts
            .remove_checkout(project.path(), &info.path)
            .unwrap();
        assert!(!info.path.exists());
        assert!(checkouts.list_checkouts(project.path()).unwrap().is_empty());
    }

    #[test]
    fn test_create_is_idempotent() {
        let project = tempdir().unwrap();
        let base = tempdir().unwrap();
        setup_repo(project.path());
        let checkouts = GitCheckouts::new(base.path(), "feature/");

        let first = checkouts
            .create_checkout(project.path(), "web", "T-2")
            .unwrap();
        let second = checkouts
            .create_checkout(project.path(), "web", "T-2")
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_create_fails_outside_repository() {
        let project = tempdir().unwrap();
        let base = tempdir().unwrap();
        let checkouts = GitCheckouts::new(base.path(), "feature/");
        let err = checkouts
            .create_checkout(project.path(), "web", "T-3")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Not a git repository"));
    }

    #[test]
    fn test_unknown_path_has_no_changes() {
        let checkouts = GitCheckouts::new(Path::new("/wt"), "feature/");
        assert!(!checkouts.has_uncommitted_changes(Path::new("/definitely/not/here")));
    }
}
