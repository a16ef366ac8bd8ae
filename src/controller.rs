//! Reindex selected indexes at their current search version on startup.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::index::IndexDefinition;
use crate::version_reindexer::IndexVersionReindexer;

pub struct ReindexingController {
    defs: Vec<Arc<IndexDefinition>>,
    reindex_on_start: BTreeSet<String>,
    reindexer: Arc<IndexVersionReindexer>,
}

impl ReindexingController {
    pub fn new<I, S>(defs: Vec<Arc<IndexDefinition>>, reindex_on_start: I, reindexer: Arc<IndexVersionReindexer>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            defs,
            reindex_on_start: reindex_on_start.into_iter().map(Into::into).collect(),
            reindexer,
        }
    }

    /// Run the startup reindex on a one-shot thread. Failures are logged and
    /// never stop the process.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let targets: Vec<_> = self
            .defs
            .iter()
            .filter(|def| self.reindex_on_start.contains(def.name()))
            .cloned()
            .collect();
        let reindexer = Arc::clone(&self.reindexer);

        let handle = thread::Builder::new()
            .name("reindex-on-start".to_string())
            .spawn(move || {
                for def in targets {
                    reindex_at_search_version(&reindexer, def);
                }
            })?;
        Ok(handle)
    }
}

fn reindex_at_search_version(reindexer: &IndexVersionReindexer, def: Arc<IndexDefinition>) {
    let name = def.name().to_string();
    let Some(version) = def.collection().search_version() else {
        tracing::warn!(index = %name, "no search index; skipping reindex on start");
        return;
    };

    match reindexer.reindex(def, version, true, true).and_then(|future| future.get()) {
        Ok(result) if result.success() => {
            tracing::info!(index = %name, version, done = result.done_count(), "reindex on start complete");
        }
        Ok(result) => {
            tracing::warn!(
                index = %name,
                version,
                done = result.done_count(),
                failed = result.failed_count(),
                "reindex on start finished with failures"
            );
        }
        Err(e) => {
            tracing::error!(index = %name, version, error = %e, "reindex on start failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BatchExecutor;
    use crate::index::testing::{definition, CountingIndexer, MemFactory};
    use crate::index::IndexFactory;
    use crate::schema::Schema;

    fn serving(name: &str, version: u32, count: u64) -> Arc<IndexDefinition> {
        let factory = Arc::new(MemFactory::default());
        let def = definition(name, &[version], factory.clone(), Arc::new(CountingIndexer { count, fail: false }));
        let index = factory.create(Arc::new(Schema::new(version, ["id"]))).unwrap();
        index.replace("kept", serde_json::json!({})).unwrap();
        def.collection().set_search_index(Arc::clone(&index));
        def.collection().add_write_index(index);
        def
    }

    fn reindexer() -> Arc<IndexVersionReindexer> {
        Arc::new(IndexVersionReindexer::new(Arc::new(BatchExecutor::new("batch-test", 1).unwrap())))
    }

    #[test]
    fn test_only_flagged_indexes_are_reindexed() {
        let changes = serving("changes", 10, 3);
        let accounts = serving("accounts", 2, 3);

        let controller = ReindexingController::new(vec![changes.clone(), accounts.clone()], ["changes"], reindexer());
        controller.start().unwrap().join().unwrap();

        let changes_index = changes.collection().search_index().unwrap();
        assert_eq!(changes_index.doc_count(), 4, "reuse keeps existing documents");
        assert!(changes_index.get("kept").is_some());
        assert_eq!(accounts.collection().search_index().unwrap().doc_count(), 1);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let factory = Arc::new(MemFactory::default());
        let indexer = Arc::new(CountingIndexer { count: 1, fail: false });
        // No search index at all.
        let idle = definition("groups", &[1], factory.clone(), indexer.clone());
        // Search index without a matching write index.
        let unwritable = definition("projects", &[5], factory.clone(), indexer);
        unwritable
            .collection()
            .set_search_index(factory.create(Arc::new(Schema::new(5, ["id"]))).unwrap());

        let controller = ReindexingController::new(vec![idle, unwritable.clone()], ["groups", "projects"], reindexer());
        controller.start().unwrap().join().unwrap();

        assert_eq!(unwritable.collection().search_index().unwrap().doc_count(), 0);
    }
}
