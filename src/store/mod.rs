//! Durable record store.
//!
//! Documents are whole JSON files. Writers read the whole document, mutate it in memory
//! and replace it atomically (write to a sibling temporary file, then rename), so no reader
//! ever observes a partial document. Read-check-write sequences that must not interleave
//! across processes (lease claims, queue appends) run under [`RecordStore::exclusive`],
//! an advisory `fs2` lock on a shared guard file.

pub mod layout;

pub use layout::{InitResult, SWITCHYARD_DIR, StateLayout};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::Path;

/// Handle over a switchyard root. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RecordStore {
    layout: StateLayout,
}

/// Held for the duration of a read-check-write sequence. The advisory lock is released
/// when the guard is dropped.
#[derive(Debug)]
pub struct StoreGuard {
    file: File,
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl RecordStore {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            layout: StateLayout::new(project_dir),
        }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Read a document, returning `T::default()` if it is missing or unparsable.
    pub fn read_or_default<T>(&self, path: &Path) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.read_optional(path).ok().flatten().unwrap_or_default()
    }

    /// Read a document that may legitimately be absent.
    pub fn read_optional<T>(&self, path: &Path) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    /// Atomically replace `path` with the pretty JSON rendition of `value`.
    pub fn write<T>(&self, path: &Path, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("Failed to serialize {}", path.display()))?;
        self.write_text(path, &json)
    }

    /// Atomically replace `path` with `content`.
    pub fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "record".to_string());
        let tmp_path = path.with_file_name(format!(
            "{}.tmp.{}.{}",
            file_name,
            std::process::id(),
            nanos
        ));
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path).with_context(|| {
            let _ = std::fs::remove_file(&tmp_path);
            format!("Failed to replace {}", path.display())
        })?;
        Ok(())
    }

    /// Remove a document if it exists.
    pub fn remove(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Take the store-wide advisory write lock. Blocks until it is available.
    pub fn exclusive(&self) -> Result<StoreGuard> {
        let path = self.layout.guard_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open guard file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(StoreGuard { file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        items: Vec<String>,
    }

    fn make_store() -> (RecordStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.layout().init().unwrap();
        (store, dir)
    }

    #[test]
    fn test_missing_document_reads_default() {
        let (store, _dir) = make_store();
        let doc: Doc = store.read_or_default(&store.layout().locks_file());
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn test_corrupt_document_reads_default() {
        let (store, _dir) = make_store();
        let path = store.layout().locks_file();
        std::fs::write(&path, "{ not json").unwrap();
        let doc: Doc = store.read_or_default(&path);
        assert!(doc.items.is_empty());
        assert!(store.read_optional::<Doc>(&path).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let (store, _dir) = make_store();
        let path = store.layout().locks_file();
        let doc = Doc {
            items: vec!["a".into(), "b".into()],
        };
        store.write(&path, &doc).unwrap();
        let back: Option<Doc> = store.read_optional(&path).unwrap();
        assert_eq!(back, Some(doc));
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let (store, _dir) = make_store();
        let path = store.layout().locks_file();
        store.write(&path, &Doc::default()).unwrap();
        store.write(&path, &Doc::default()).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(store.layout().state_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let path = store.layout().queue_file("backend");
        store.write(&path, &Doc::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_exclusive_guard_is_reentrant_after_drop() {
        let (store, _dir) = make_store();
        {
            let _guard = store.exclusive().unwrap();
        }
        let _again = store.exclusive().unwrap();
    }
}
