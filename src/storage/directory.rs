//! DirectoryIndex - one schema version of one index stored as a JSON
//! document map in its own directory
//!
//! # Architecture
//!
//! - Documents live in memory behind a `RwLock` and reach disk on `flush()`
//! - `flush()` writes `documents.json.tmp`, syncs it and renames it over
//!   `documents.json`, so a crash leaves either the old or the new file
//! - Ready flags go to the shared status store, not into the directory
//! - `DirectoryIndexFactory` answers `exists` by probing the directory

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{IndexError, Result};
use crate::index::{Document, Index, IndexFactory, IndexRef};
use crate::schema::{index_dir_name, parse_index_dir_name, Schema};
use crate::status::{set_ready_and_save, SharedStatus};

pub const DOCUMENTS_FILE: &str = "documents.json";

pub struct DirectoryIndex {
    name: String,
    schema: Arc<Schema>,
    dir: PathBuf,
    docs: RwLock<BTreeMap<String, Document>>,
    status: SharedStatus,
    dirty: AtomicBool,
}

impl DirectoryIndex {
    /// Open (creating if needed) `<root>/<name>_<version>`.
    pub fn open(root: &Path, name: &str, schema: Arc<Schema>, status: SharedStatus) -> Result<Self> {
        let dir = root.join(index_dir_name(name, schema.version()));
        fs::create_dir_all(&dir)?;

        let docs = match fs::read(dir.join(DOCUMENTS_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                IndexError::Storage(format!("{}: corrupt {}: {}", dir.display(), DOCUMENTS_FILE, e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            name: name.to_string(),
            schema,
            dir,
            docs: RwLock::new(docs),
            status,
            dirty: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ids(&self) -> Vec<String> {
        self.docs.read().keys().cloned().collect()
    }

    fn write_documents(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&*self.docs.read())?;
        let tmp_path = self.dir.join(format!("{}.tmp", DOCUMENTS_FILE));
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, self.dir.join(DOCUMENTS_FILE))?;
        Ok(())
    }
}

impl Index for DirectoryIndex {
    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn replace(&self, id: &str, doc: Document) -> Result<()> {
        self.docs.write().insert(id.to_string(), doc);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        if self.docs.write().remove(id).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Document> {
        self.docs.read().get(id).cloned()
    }

    fn doc_count(&self) -> usize {
        self.docs.read().len()
    }

    fn delete_all(&self) -> Result<()> {
        self.docs.write().clear();
        self.dirty.store(false, Ordering::Release);
        self.write_documents()
    }

    fn flush(&self) -> Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.write_documents() {
                self.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }

    fn mark_ready(&self, ready: bool) -> Result<()> {
        set_ready_and_save(&self.status, &self.name, self.schema.version(), ready)
    }

    fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (id, doc) in self.docs.read().iter() {
            hasher.update(id.as_bytes());
            hasher.update(&[0]);
            hasher.update(doc.to_string().as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    fn close(&self) {
        if let Err(e) = self.flush() {
            tracing::warn!(index = %self.name, version = self.schema.version(), error = %e, "flush on close failed");
        }
    }
}

/// Creates [`DirectoryIndex`] instances for one index name under `root`.
pub struct DirectoryIndexFactory {
    root: PathBuf,
    name: String,
    status: SharedStatus,
}

impl DirectoryIndexFactory {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>, status: SharedStatus) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
            status,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl IndexFactory for DirectoryIndexFactory {
    fn create(&self, schema: Arc<Schema>) -> Result<IndexRef> {
        let index = DirectoryIndex::open(&self.root, &self.name, schema, Arc::clone(&self.status))?;
        Ok(Arc::new(index))
    }

    fn exists(&self, version: u32) -> bool {
        self.root.join(index_dir_name(&self.name, version)).is_dir()
    }

    fn on_disk_versions(&self) -> Result<Vec<u32>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(version) = parse_index_dir_name(&self.name, &file_name.to_string_lossy()) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::IndexStatusStore;
    use serde_json::json;
    use tempfile::tempdir;

    fn shared_status(root: &Path) -> SharedStatus {
        IndexStatusStore::open_shared(root.join("gerrit_index.config")).unwrap()
    }

    #[test]
    fn test_documents_survive_reopen_after_flush() {
        let dir = tempdir().unwrap();
        let status = shared_status(dir.path());
        let schema = Arc::new(Schema::new(3, ["id", "subject"]));

        let index = DirectoryIndex::open(dir.path(), "changes", schema.clone(), status.clone()).unwrap();
        index.replace("1", json!({"subject": "fix"})).unwrap();
        index.replace("2", json!({"subject": "feat"})).unwrap();
        index.delete("2").unwrap();
        index.flush().unwrap();

        let reopened = DirectoryIndex::open(dir.path(), "changes", schema, status).unwrap();
        assert_eq!(reopened.doc_count(), 1);
        assert_eq!(reopened.get("1"), Some(json!({"subject": "fix"})));
        assert!(dir.path().join("changes_0003").join(DOCUMENTS_FILE).exists());
        assert!(!dir.path().join("changes_0003").join("documents.json.tmp").exists());
    }

    #[test]
    fn test_unflushed_writes_are_lost() {
        let dir = tempdir().unwrap();
        let status = shared_status(dir.path());
        let schema = Arc::new(Schema::new(1, ["id"]));

        let index = DirectoryIndex::open(dir.path(), "accounts", schema.clone(), status.clone()).unwrap();
        index.replace("a", json!({})).unwrap();
        drop(index);

        let reopened = DirectoryIndex::open(dir.path(), "accounts", schema, status).unwrap();
        assert_eq!(reopened.doc_count(), 0);
    }

    #[test]
    fn test_delete_all_is_durable() {
        let dir = tempdir().unwrap();
        let status = shared_status(dir.path());
        let schema = Arc::new(Schema::new(1, ["id"]));

        let index = DirectoryIndex::open(dir.path(), "groups", schema.clone(), status.clone()).unwrap();
        index.replace("g", json!({})).unwrap();
        index.flush().unwrap();
        index.delete_all().unwrap();

        let reopened = DirectoryIndex::open(dir.path(), "groups", schema, status).unwrap();
        assert_eq!(reopened.doc_count(), 0);
    }

    #[test]
    fn test_corrupt_documents_file() {
        let dir = tempdir().unwrap();
        let status = shared_status(dir.path());
        let version_dir = dir.path().join("changes_0001");
        fs::create_dir_all(&version_dir).unwrap();
        fs::write(version_dir.join(DOCUMENTS_FILE), b"{not json").unwrap();

        let result = DirectoryIndex::open(dir.path(), "changes", Arc::new(Schema::new(1, ["id"])), status);
        assert!(matches!(result, Err(IndexError::Storage(_))));
    }

    #[test]
    fn test_mark_ready_writes_status_store() {
        let dir = tempdir().unwrap();
        let status = shared_status(dir.path());
        let index = DirectoryIndex::open(dir.path(), "changes", Arc::new(Schema::new(11, ["id"])), status.clone()).unwrap();

        index.mark_ready(true).unwrap();
        let reopened = IndexStatusStore::open(dir.path().join("gerrit_index.config")).unwrap();
        assert!(reopened.get_ready("changes", 11));

        index.mark_ready(false).unwrap();
        let reopened = IndexStatusStore::open(dir.path().join("gerrit_index.config")).unwrap();
        assert!(!reopened.get_ready("changes", 11));
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let dir = tempdir().unwrap();
        let status = shared_status(dir.path());
        let a = DirectoryIndex::open(dir.path(), "a", Arc::new(Schema::new(1, ["id"])), status.clone()).unwrap();
        let b = DirectoryIndex::open(dir.path(), "b", Arc::new(Schema::new(1, ["id"])), status).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        a.replace("x", json!({"n": 1})).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        b.replace("x", json!({"n": 1})).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_factory_checks_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("index");
        let status = shared_status(dir.path());
        let factory = DirectoryIndexFactory::new(&root, "changes", status);

        assert!(!factory.exists(10));
        assert!(factory.on_disk_versions().unwrap().is_empty());

        factory.create(Arc::new(Schema::new(10, ["id"]))).unwrap();
        fs::create_dir_all(root.join("changes_0007")).unwrap();
        fs::create_dir_all(root.join("accounts_0002")).unwrap();
        fs::write(root.join("changes_0009"), b"not a directory").unwrap();

        assert!(factory.exists(10));
        assert!(!factory.exists(9));
        assert_eq!(factory.on_disk_versions().unwrap(), vec![7, 10]);
    }
}
