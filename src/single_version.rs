//! Pin every index to exactly one schema version.
//!
//! Used by tools and replicas that must never run online upgrades: no scan,
//! no reindexer, one instance serving both reads and writes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::index::IndexDefinition;

pub struct SingleVersionListener {
    defs: Vec<Arc<IndexDefinition>>,
    versions: HashMap<String, u32>,
}

impl SingleVersionListener {
    /// `versions` maps index names to the version to open; unlisted indexes
    /// use their latest schema.
    pub fn new(defs: Vec<Arc<IndexDefinition>>, versions: HashMap<String, u32>) -> Self {
        Self { defs, versions }
    }

    pub fn start(&self) -> Result<()> {
        for def in &self.defs {
            let schema = match self.versions.get(def.name()) {
                Some(&version) => def.require_schema(version)?,
                None => def.latest(),
            };
            let version = schema.version();
            let index = def.factory().create(schema)?;

            let collection = def.collection();
            collection.set_search_index(Arc::clone(&index));
            for stale in collection.write_versions() {
                if stale != version {
                    // Search already points at `version`.
                    collection.remove_write_index(stale)?;
                }
            }
            collection.add_write_index(index);
            tracing::info!(index = def.name(), version, "opened single index version");
        }
        Ok(())
    }

    pub fn stop(&self) {
        for def in &self.defs {
            if let Some(index) = def.collection().search_index() {
                index.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::index::testing::{definition, CountingIndexer, MemFactory};

    fn defs() -> (Arc<IndexDefinition>, Arc<IndexDefinition>) {
        let indexer = Arc::new(CountingIndexer { count: 0, fail: false });
        (
            definition("changes", &[10, 11], Arc::new(MemFactory::default()), indexer.clone()),
            definition("accounts", &[4, 5], Arc::new(MemFactory::default()), indexer),
        )
    }

    #[test]
    fn test_latest_by_default_and_requested_otherwise() {
        let (changes, accounts) = defs();
        let listener = SingleVersionListener::new(
            vec![changes.clone(), accounts.clone()],
            HashMap::from([("accounts".to_string(), 4)]),
        );
        listener.start().unwrap();

        assert_eq!(changes.collection().search_version(), Some(11));
        assert_eq!(changes.collection().write_versions(), vec![11]);
        assert_eq!(accounts.collection().search_version(), Some(4));
        assert_eq!(accounts.collection().write_versions(), vec![4]);

        let search = accounts.collection().search_index().unwrap();
        let write = accounts.collection().write_index(4).unwrap();
        assert!(Arc::ptr_eq(&search, &write));
        listener.stop();
    }

    #[test]
    fn test_unsupported_version_lists_supported() {
        let (changes, _) = defs();
        let listener = SingleVersionListener::new(vec![changes], HashMap::from([("changes".to_string(), 3)]));

        match listener.start() {
            Err(IndexError::UnsupportedVersion { name, version, supported }) => {
                assert_eq!(name, "changes");
                assert_eq!(version, 3);
                assert_eq!(supported, vec![10, 11]);
            }
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_restart_replaces_previous_instance() {
        let (changes, _) = defs();
        SingleVersionListener::new(vec![changes.clone()], HashMap::from([("changes".to_string(), 10)]))
            .start()
            .unwrap();
        SingleVersionListener::new(vec![changes.clone()], HashMap::new())
            .start()
            .unwrap();

        assert_eq!(changes.collection().search_version(), Some(11));
        assert_eq!(changes.collection().write_versions(), vec![11]);
    }
}
