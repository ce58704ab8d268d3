//! Registry of projects sessions can work on.

use crate::audit::{AuditEvent, AuditLogger, SYSTEM_ACTOR};
use crate::errors::{CoordError, CoordResult};
use crate::session::{Session, SessionManager, SessionProject};
use crate::store::RecordStore;
use crate::util::generate_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    pub added_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Project {
    pub fn as_session_project(&self) -> SessionProject {
        SessionProject {
            id: self.id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    store: RecordStore,
    audit: AuditLogger,
}

impl ProjectRegistry {
    pub fn new(store: RecordStore) -> Self {
        let audit = AuditLogger::new(&store.layout().audit_log());
        Self { store, audit }
    }

    fn load(&self) -> ProjectsFile {
        self.store
            .read_or_default(&self.store.layout().projects_file())
    }

    fn save(&self, file: &ProjectsFile) -> CoordResult<()> {
        self.store
            .write(&self.store.layout().projects_file(), file)?;
        Ok(())
    }

    pub fn add(&self, name: &str, path: &Path, remote: Option<&str>) -> CoordResult<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoordError::MissingArgs("Project name required".to_string()));
        }
        if !path.is_dir() {
            return Err(CoordError::InvalidPath(path.display().to_string()));
        }
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        let _guard = self.store.exclusive()?;
        let mut file = self.load();
        if file.projects.iter().any(|p| p.name == name) {
            return Err(CoordError::DuplicateProject(name.to_string()));
        }

        let now = Utc::now();
        let project = Project {
            id: generate_id("PROJ"),
            name: name.to_string(),
            path,
            remote: remote.map(str::to_string),
            added_at: now,
            last_accessed: now,
        };
        file.projects.push(project.clone());
        self.save(&file)?;

        tracing::info!(id = %project.id, name = %project.name, "project added");
        self.audit.record_quietly(
            AuditEvent::ProjectAdded,
            SYSTEM_ACTOR,
            json!({ "projectId": project.id, "name": project.name, "path": project.path }),
        );
        Ok(project)
    }

    pub fn list(&self) -> Vec<Project> {
        self.load().projects
    }

    /// Look a project up by id, then by name.
    pub fn resolve(&self, id_or_name: &str) -> CoordResult<Project> {
        let file = self.load();
        file.projects
            .iter()
            .find(|p| p.id == id_or_name)
            .or_else(|| file.projects.iter().find(|p| p.name == id_or_name))
            .cloned()
            .ok_or_else(|| CoordError::ProjectNotFound(id_or_name.to_string()))
    }

    /// Make `id_or_name` the project of the resolved session.
    pub fn use_project(
        &self,
        sessions: &SessionManager,
        id_or_name: &str,
        session_id: Option<&str>,
    ) -> CoordResult<(Project, Session)> {
        let _guard = self.store.exclusive()?;
        let mut session = sessions.resolve(session_id)?;
        let mut file = self.load();
        let project = file
            .projects
            .iter_mut()
            .find(|p| p.id == id_or_name || p.name == id_or_name)
            .ok_or_else(|| CoordError::ProjectNotFound(id_or_name.to_string()))?;

        if !project.path.exists() {
            return Err(CoordError::InvalidPath(project.path.display().to_string()));
        }
        project.last_accessed = Utc::now();
        let project = project.clone();
        self.save(&file)?;

        session.project = Some(project.as_session_project());
        sessions.touch(&mut session)?;

        self.audit.record_quietly(
            AuditEvent::ProjectSwitched,
            &session.id,
            json!({ "projectId": project.id, "name": project.name }),
        );
        Ok((project, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_registry() -> (ProjectRegistry, SessionManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.layout().init().unwrap();
        (
            ProjectRegistry::new(store.clone()),
            SessionManager::new(store, 24),
            dir,
        )
    }

    #[test]
    fn test_add_and_resolve() {
        let (projects, _sessions, dir) = make_registry();
        let added = projects.add("web", dir.path(), Some("git@x:web.git")).unwrap();
        assert!(added.id.starts_with("PROJ-"));
        assert_eq!(projects.resolve("web").unwrap().id, added.id);
        assert_eq!(projects.resolve(&added.id).unwrap().name, "web");
        assert_eq!(projects.list().len(), 1);
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_input() {
        let (projects, _sessions, dir) = make_registry();
        projects.add("web", dir.path(), None).unwrap();
        assert!(matches!(
            projects.add("web", dir.path(), None).unwrap_err(),
            CoordError::DuplicateProject(_)
        ));
        assert!(matches!(
            projects.add("  ", dir.path(), None).unwrap_err(),
            CoordError::MissingArgs(_)
        ));
        assert!(matches!(
            projects
                .add("ghost", &dir.path().join("missing"), None)
                .unwrap_err(),
            CoordError::InvalidPath(_)
        ));
    }

    #[test]
    fn test_resolve_unknown() {
        let (projects, _sessions, _dir) = make_registry();
        assert!(matches!(
            projects.resolve("nope").unwrap_err(),
            CoordError::ProjectNotFound(_)
        ));
    }

    #[test]
    fn test_use_project_attaches_to_session() {
        let (projects, sessions, dir) = make_registry();
        let project = projects.add("web", dir.path(), None).unwrap();
        let session = sessions.create(None).unwrap();

        let (used, updated) = projects.use_project(&sessions, "web", None).unwrap();
        assert_eq!(used.id, project.id);
        assert!(used.last_accessed >= project.last_accessed);
        assert_eq!(updated.project.as_ref().unwrap().id, project.id);
        assert_eq!(
            sessions.get(&session.id).unwrap().project.unwrap().name,
            "web"
        );
    }

    #[test]
    fn test_use_project_requires_session() {
        let (projects, sessions, dir) = make_registry();
        projects.add("web", dir.path(), None).unwrap();
        assert!(matches!(
            projects.use_project(&sessions, "web", None).unwrap_err(),
            CoordError::NoSession
        ));
    }
}
