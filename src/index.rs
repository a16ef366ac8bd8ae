//! Collaborator contracts consumed by the version management engine.
//!
//! The engine never looks inside an index. It only needs to create one per
//! schema version, probe whether a version has storage, wipe it, fill it
//! through a [`SiteIndexer`] and flag it ready.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::collection::IndexCollection;
use crate::error::{IndexError, Result};
use crate::schema::Schema;

/// Documents are JSON objects keyed by id.
pub type Document = serde_json::Value;

/// One physical index at one schema version.
pub trait Index: Send + Sync {
    fn schema(&self) -> Arc<Schema>;

    fn version(&self) -> u32 {
        self.schema().version()
    }

    /// Insert or replace a document.
    fn replace(&self, id: &str, doc: Document) -> Result<()>;

    fn delete(&self, id: &str) -> Result<()>;

    fn get(&self, id: &str) -> Option<Document>;

    fn doc_count(&self) -> usize;

    /// Remove every document. Must leave the index empty and durable.
    fn delete_all(&self) -> Result<()>;

    fn flush(&self) -> Result<()>;

    /// Persist the "safe to serve queries" flag for this version.
    fn mark_ready(&self, ready: bool) -> Result<()>;

    /// Digest of the current document set; equal digests mean equal contents.
    fn fingerprint(&self) -> String;

    fn close(&self) {}
}

/// Shared handle to an index instance.
pub type IndexRef = Arc<dyn Index>;

/// Creates index instances and probes their storage.
pub trait IndexFactory: Send + Sync {
    fn create(&self, schema: Arc<Schema>) -> Result<IndexRef>;

    /// Whether storage for `version` is present.
    fn exists(&self, version: u32) -> bool;

    /// Versions present in storage, including ones no schema describes anymore.
    fn on_disk_versions(&self) -> Result<Vec<u32>> {
        Ok(Vec::new())
    }
}

/// Who is driving a batch index run.
///
/// Passed explicitly through the indexing call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexMode {
    /// Background upgrade while the old version keeps serving queries.
    Online,
    /// Operator-driven run.
    Offline,
}

impl ReindexMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReindexMode::Online => "online",
            ReindexMode::Offline => "offline",
        }
    }
}

/// Options for [`SiteIndexer::index_all`].
#[derive(Debug, Clone, Copy)]
pub struct IndexAllOptions {
    pub mode: ReindexMode,
    /// Keep documents already present in the target when they are unchanged.
    pub reuse: bool,
    pub notify_listeners: bool,
}

impl IndexAllOptions {
    pub fn online() -> Self {
        Self {
            mode: ReindexMode::Online,
            reuse: false,
            notify_listeners: true,
        }
    }

    pub fn offline(reuse: bool, notify_listeners: bool) -> Self {
        Self {
            mode: ReindexMode::Offline,
            reuse,
            notify_listeners,
        }
    }
}

/// Outcome of a batch index run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexResult {
    success: bool,
    done_count: u64,
    failed_count: u64,
    elapsed: Duration,
}

impl ReindexResult {
    pub fn new(success: bool, done_count: u64, failed_count: u64, elapsed: Duration) -> Self {
        Self {
            success,
            done_count,
            failed_count,
            elapsed,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn done_count(&self) -> u64 {
        self.done_count
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Fills an index with every document of the site.
pub trait SiteIndexer: Send + Sync {
    fn index_all(&self, index: &dyn Index, options: IndexAllOptions) -> Result<ReindexResult>;
}

/// Everything the engine knows about one logical index.
pub struct IndexDefinition {
    name: String,
    schemas: BTreeMap<u32, Arc<Schema>>,
    latest: Arc<Schema>,
    collection: Arc<IndexCollection>,
    factory: Arc<dyn IndexFactory>,
    site_indexer: Arc<dyn SiteIndexer>,
}

impl IndexDefinition {
    pub fn new<I>(
        name: impl Into<String>,
        schemas: I,
        factory: Arc<dyn IndexFactory>,
        site_indexer: Arc<dyn SiteIndexer>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Schema>,
    {
        let name = name.into();
        let schemas: BTreeMap<u32, Arc<Schema>> = schemas
            .into_iter()
            .map(|s| (s.version(), Arc::new(s)))
            .collect();
        let latest = match schemas.values().next_back() {
            Some(schema) => Arc::clone(schema),
            None => {
                return Err(IndexError::Config(format!(
                    "index '{}' declares no schema versions",
                    name
                )))
            }
        };
        let collection = Arc::new(IndexCollection::new(name.clone()));
        Ok(Self {
            name,
            schemas,
            latest,
            collection,
            factory,
            site_indexer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schemas(&self) -> &BTreeMap<u32, Arc<Schema>> {
        &self.schemas
    }

    pub fn schema(&self, version: u32) -> Option<Arc<Schema>> {
        self.schemas.get(&version).cloned()
    }

    /// Resolve `version` or fail listing what this binary supports.
    pub fn require_schema(&self, version: u32) -> Result<Arc<Schema>> {
        self.schema(version)
            .ok_or_else(|| IndexError::UnsupportedVersion {
                name: self.name.clone(),
                version,
                supported: self.schemas.keys().copied().collect(),
            })
    }

    pub fn latest(&self) -> Arc<Schema> {
        Arc::clone(&self.latest)
    }

    pub fn collection(&self) -> &Arc<IndexCollection> {
        &self.collection
    }

    pub fn factory(&self) -> &Arc<dyn IndexFactory> {
        &self.factory
    }

    pub fn site_indexer(&self) -> &Arc<dyn SiteIndexer> {
        &self.site_indexer
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_definition_requires_schemas() {
        let factory = Arc::new(MemFactory::default());
        let indexer = Arc::new(CountingIndexer { count: 0, fail: false });
        let result = IndexDefinition::new("changes", Vec::new(), factory, indexer);
        assert!(matches!(result, Err(IndexError::Config(_))));
    }

    #[test]
    fn test_definition_latest_is_highest_version() {
        let def = definition(
            "changes",
            &[3, 1, 2],
            Arc::new(MemFactory::default()),
            Arc::new(CountingIndexer { count: 0, fail: false }),
        );
        assert_eq!(def.latest().version(), 3);
        assert_eq!(def.schemas().keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_require_schema_lists_supported_versions() {
        let def = definition(
            "groups",
            &[4, 5],
            Arc::new(MemFactory::default()),
            Arc::new(CountingIndexer { count: 0, fail: false }),
        );
        match def.require_schema(9) {
            Err(IndexError::UnsupportedVersion { supported, .. }) => assert_eq!(supported, vec![4, 5]),
            other => panic!("expected UnsupportedVersion, got {:?}", other.map(|s| s.version())),
        }
    }

    #[test]
    fn test_reindex_result_accessors() {
        let result = ReindexResult::new(false, 10, 2, Duration::from_millis(5));
        assert!(!result.success());
        assert_eq!(result.done_count(), 10);
        assert_eq!(result.failed_count(), 2);
    }
}
