//! IndexCollection - the search index and write indexes of one logical index
//!
//! # Architecture
//!
//! - The search index sits behind an `ArcSwapOption`: readers load it without
//!   locking and always see either the old or the new instance
//! - Write indexes live in a version-keyed map behind a `RwLock`; iteration
//!   works on a snapshot so concurrent add/remove never disturbs callers
//! - The collection never pools instances: one `Index` per schema version

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;

use crate::error::{IndexError, Result};
use crate::index::IndexRef;

pub struct IndexCollection {
    name: String,
    search: ArcSwapOption<IndexRef>,
    write: RwLock<BTreeMap<u32, IndexRef>>,
}

impl IndexCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search: ArcSwapOption::empty(),
            write: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish `index` as the search index. Returns the previous one.
    pub fn set_search_index(&self, index: IndexRef) -> Option<IndexRef> {
        self.search
            .swap(Some(Arc::new(index)))
            .map(|previous| Arc::clone(&*previous))
    }

    pub fn search_index(&self) -> Option<IndexRef> {
        self.search.load_full().map(|index| Arc::clone(&*index))
    }

    pub fn search_version(&self) -> Option<u32> {
        self.search.load_full().map(|index| index.version())
    }

    /// Register a write target. An index already registered for the same
    /// version is replaced and returned.
    pub fn add_write_index(&self, index: IndexRef) -> Option<IndexRef> {
        self.write.write().insert(index.version(), index)
    }

    /// Stop writing to `version`. The current search index cannot be removed.
    pub fn remove_write_index(&self, version: u32) -> Result<Option<IndexRef>> {
        let mut write = self.write.write();
        if self.search_version() == Some(version) {
            return Err(IndexError::RemoveSearchIndex {
                name: self.name.clone(),
                version,
            });
        }
        Ok(write.remove(&version))
    }

    pub fn write_index(&self, version: u32) -> Option<IndexRef> {
        self.write.read().get(&version).cloned()
    }

    /// Snapshot of the write indexes, lowest version first.
    pub fn write_indexes(&self) -> Vec<IndexRef> {
        self.write.read().values().cloned().collect()
    }

    pub fn write_versions(&self) -> Vec<u32> {
        self.write.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::MemFactory;
    use crate::index::IndexFactory;
    use crate::schema::Schema;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn make_index(factory: &MemFactory, version: u32) -> IndexRef {
        factory.create(Arc::new(Schema::new(version, ["id"]))).unwrap()
    }

    #[test]
    fn test_empty_collection() {
        let collection = IndexCollection::new("changes");
        assert!(collection.search_index().is_none());
        assert_eq!(collection.search_version(), None);
        assert!(collection.write_indexes().is_empty());
    }

    #[test]
    fn test_set_search_index_returns_previous() {
        let factory = MemFactory::default();
        let collection = IndexCollection::new("changes");

        assert!(collection.set_search_index(make_index(&factory, 1)).is_none());
        let previous = collection.set_search_index(make_index(&factory, 2)).unwrap();
        assert_eq!(previous.version(), 1);
        assert_eq!(collection.search_version(), Some(2));
    }

    #[test]
    fn test_write_indexes_keyed_by_version() {
        let factory = MemFactory::default();
        let collection = IndexCollection::new("changes");

        collection.add_write_index(make_index(&factory, 11));
        collection.add_write_index(make_index(&factory, 10));
        let replaced = collection.add_write_index(make_index(&factory, 11));

        assert!(replaced.is_some());
        assert_eq!(collection.write_versions(), vec![10, 11]);
        assert_eq!(collection.write_indexes().len(), 2);
    }

    #[test]
    fn test_remove_search_index_rejected() {
        let factory = MemFactory::default();
        let collection = IndexCollection::new("changes");
        let index = make_index(&factory, 10);
        collection.set_search_index(Arc::clone(&index));
        collection.add_write_index(index);
        collection.add_write_index(make_index(&factory, 11));

        let result = collection.remove_write_index(10);
        assert!(matches!(result, Err(IndexError::RemoveSearchIndex { version: 10, .. })));
        assert_eq!(collection.write_versions(), vec![10, 11]);

        let removed = collection.remove_write_index(11).unwrap();
        assert_eq!(removed.map(|i| i.version()), Some(11));
        assert_eq!(collection.write_versions(), vec![10]);
    }

    #[test]
    fn test_remove_missing_write_index_is_none() {
        let collection = IndexCollection::new("changes");
        assert!(collection.remove_write_index(3).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_readers_never_see_missing_search_index() {
        let factory = MemFactory::default();
        let collection = Arc::new(IndexCollection::new("changes"));
        collection.set_search_index(make_index(&factory, 1));

        let stop = Arc::new(AtomicBool::new(false));
        let mut readers = vec![];
        for _ in 0..4 {
            let collection = Arc::clone(&collection);
            let stop = Arc::clone(&stop);
            readers.push(thread::spawn(move || {
                let mut seen = 0u64;
                while !stop.load(Ordering::SeqCst) || seen < 100 {
                    let index = collection.search_index().expect("search index must always be set");
                    assert!(index.version() == 1 || index.version() == 2);
                    seen += 1;
                }
                seen
            }));
        }

        for i in 0..1000 {
            collection.set_search_index(make_index(&factory, if i % 2 == 0 { 2 } else { 1 }));
        }
        stop.store(true, Ordering::SeqCst);

        for reader in readers {
            assert!(reader.join().unwrap() >= 100);
        }
    }
}
