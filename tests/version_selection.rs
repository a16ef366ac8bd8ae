//! Property tests for version scanning and selection.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;

use index_versions::storage::{DirectoryIndexFactory, MemorySource, SourceSiteIndexer};
use index_versions::{
    index_dir_name, scan_versions, select_versions, IndexDefinition, IndexError, IndexStatusStore, Schema, Version,
};

const PROPTEST_CASES: u32 = 256;

/// (exists, ready-flag) per version, versions numbered from 1.
fn arb_flags() -> impl Strategy<Value = Vec<(bool, bool)>> {
    prop::collection::vec((any::<bool>(), any::<bool>()), 1..8)
}

fn scanned(flags: &[(bool, bool)]) -> BTreeMap<u32, Version> {
    flags
        .iter()
        .enumerate()
        .map(|(i, &(exists, ready))| {
            let version = i as u32 + 1;
            let schema = Arc::new(Schema::new(version, ["id"]));
            (version, Version::new(Some(schema), version, exists, ready))
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    #[test]
    fn ready_implies_exists(exists in any::<bool>(), ready in any::<bool>(), version in 1u32..10_000) {
        let v = Version::new(None, version, exists, ready);
        prop_assert!(!v.ready || v.exists);
    }

    #[test]
    fn search_is_highest_ready_version(flags in arb_flags(), online in any::<bool>()) {
        let versions = scanned(&flags);
        let highest_ready = versions.values().filter(|v| v.ready).map(|v| v.version).max();

        match (select_versions("changes", &versions, online), highest_ready) {
            (Ok(selection), Some(expected)) => {
                prop_assert_eq!(selection.search, expected);
                prop_assert!(selection.write.contains(&expected));
                prop_assert!(selection.write.len() <= 2);
                prop_assert!(selection.write[0] >= selection.search);
                if !online {
                    prop_assert_eq!(selection.write.clone(), vec![expected]);
                }
            }
            (Err(IndexError::NoReadyVersion { .. }), None) => {}
            (result, expected) => {
                prop_assert!(false, "unexpected {:?} for highest ready {:?}", result.map(|s| s.search), expected);
            }
        }
    }

    #[test]
    fn upgrade_target_prefers_existing_versions(flags in arb_flags()) {
        let versions = scanned(&flags);
        let Ok(selection) = select_versions("changes", &versions, true) else {
            return Ok(());
        };
        let newer: Vec<&Version> = versions.values().filter(|v| v.version > selection.search).collect();
        let target = selection.write[0];

        if let Some(existing) = newer.iter().filter(|v| v.exists).map(|v| v.version).max() {
            prop_assert_eq!(target, existing);
        } else if let Some(latest) = newer.iter().map(|v| v.version).max() {
            prop_assert_eq!(target, latest);
        } else {
            prop_assert_eq!(target, selection.search);
        }
    }

    #[test]
    fn selection_is_deterministic(flags in arb_flags(), online in any::<bool>()) {
        let versions = scanned(&flags);
        let first = select_versions("changes", &versions, online).ok();
        let second = select_versions("changes", &versions, online).ok();
        prop_assert_eq!(first, second);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn scanner_never_reports_ready_without_storage(flags in arb_flags()) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("index");
        let status = IndexStatusStore::open_shared(root.join("gerrit_index.config")).unwrap();
        {
            let mut store = status.lock();
            for (i, &(exists, ready)) in flags.iter().enumerate() {
                let version = i as u32 + 1;
                if exists {
                    fs::create_dir_all(root.join(index_dir_name("changes", version))).unwrap();
                }
                store.set_ready("changes", version, ready);
            }
        }

        let schemas = (1..=flags.len() as u32).map(|v| Schema::new(v, ["id"]));
        let factory = Arc::new(DirectoryIndexFactory::new(&root, "changes", Arc::clone(&status)));
        let indexer = Arc::new(SourceSiteIndexer::new(MemorySource::new()));
        let def = IndexDefinition::new("changes", schemas, factory, indexer).unwrap();

        let versions = scan_versions(&def, &status.lock()).unwrap();
        prop_assert_eq!(versions.len(), flags.len());
        for (i, &(exists, ready)) in flags.iter().enumerate() {
            let v = &versions[&(i as u32 + 1)];
            prop_assert_eq!(v.exists, exists);
            prop_assert_eq!(v.ready, ready && exists);
        }
    }
}
