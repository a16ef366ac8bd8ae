//! VersionManager - picks the search and write versions of every index at
//! startup and drives online upgrades afterwards
//!
//! # Architecture
//!
//! - Index definitions are fixed at construction
//! - `start()` initialises every index: scan versions, pick the highest ready
//!   one for searches, register write targets, clear stale ready flags
//! - One [`OnlineReindexer`] per index name, created lazily during
//!   initialisation and never replaced
//! - `start_online_upgrade()` is a separate, later step so indexes serve
//!   traffic before background reindex threads spin up
//!
//! Administrative operations (`start_reindexer`, `activate_latest_index`)
//! fail with `ReindexerAlreadyRunning` instead of queueing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{IndexError, Result};
use crate::index::{IndexDefinition, IndexRef};
use crate::listener::UpgradeListeners;
use crate::reindexer::{OnlineReindexer, ReindexerStatus};
use crate::scanner::scan_versions;
use crate::schema::Version;
use crate::status::SharedStatus;

/// Versions chosen for one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSelection {
    /// Highest ready version; serves queries.
    pub search: u32,
    /// Write targets, most recent first. `write[0]` is the upgrade target
    /// and `search` is always included.
    pub write: Vec<u32>,
}

impl VersionSelection {
    pub fn upgrade_target(&self) -> u32 {
        self.write[0]
    }

    pub fn needs_upgrade(&self) -> bool {
        self.upgrade_target() != self.search
    }
}

/// Choose search and write versions from a scan.
///
/// Versions without a schema are ignored. The search version is the highest
/// ready one; without one the index cannot be served. With online upgrade
/// enabled the upgrade target is the highest version above the search version
/// that already has storage, or the latest known schema when none has.
pub fn select_versions(
    name: &str,
    versions: &BTreeMap<u32, Version>,
    online_upgrade: bool,
) -> Result<VersionSelection> {
    let known = || versions.values().rev().filter(|v| v.schema.is_some());

    let search = known()
        .find(|v| v.ready)
        .map(|v| v.version)
        .ok_or_else(|| IndexError::NoReadyVersion { name: name.to_string() })?;

    let mut write = Vec::with_capacity(2);
    if online_upgrade {
        let newer = || known().filter(move |v| v.version > search);
        let target = newer()
            .find(|v| v.exists)
            .or_else(|| newer().next())
            .map(|v| v.version);
        if let Some(target) = target {
            write.push(target);
        }
    }
    write.push(search);

    Ok(VersionSelection { search, write })
}

pub struct VersionManager {
    defs: BTreeMap<String, Arc<IndexDefinition>>,
    status: SharedStatus,
    online_upgrade: bool,
    listeners: UpgradeListeners,
    reindexers: Mutex<HashMap<String, Arc<OnlineReindexer>>>,
}

impl VersionManager {
    pub fn new<I>(defs: I, status: SharedStatus, online_upgrade: bool, listeners: UpgradeListeners) -> Self
    where
        I: IntoIterator<Item = Arc<IndexDefinition>>,
    {
        let defs = defs
            .into_iter()
            .map(|def| (def.name().to_string(), def))
            .collect();
        Self {
            defs,
            status,
            online_upgrade,
            listeners,
            reindexers: Mutex::new(HashMap::new()),
        }
    }

    pub fn online_upgrade(&self) -> bool {
        self.online_upgrade
    }

    pub fn status(&self) -> &SharedStatus {
        &self.status
    }

    pub fn listeners(&self) -> &UpgradeListeners {
        &self.listeners
    }

    pub fn definition(&self, name: &str) -> Result<&Arc<IndexDefinition>> {
        self.defs
            .get(name)
            .ok_or_else(|| IndexError::UnknownIndex(name.to_string()))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<IndexDefinition>> {
        self.defs.values()
    }

    /// Initialise every index. Fails on the first index that cannot be served.
    pub fn start(&self) -> Result<()> {
        for def in self.defs.values() {
            self.init_index(def)?;
        }
        Ok(())
    }

    /// Scan the current versions of `name` against the status store.
    pub fn scan(&self, name: &str) -> Result<BTreeMap<u32, Version>> {
        let def = self.definition(name)?;
        let status = self.status.lock();
        scan_versions(def, &status)
    }

    fn init_index(&self, def: &Arc<IndexDefinition>) -> Result<()> {
        let name = def.name();
        let versions = {
            let status = self.status.lock();
            scan_versions(def, &status)?
        };
        let selection = select_versions(name, &versions, self.online_upgrade)?;

        let factory = def.factory();
        let search_index = factory.create(def.require_schema(selection.search)?)?;
        let mut write_indexes: Vec<IndexRef> = Vec::with_capacity(selection.write.len());
        for &version in &selection.write {
            if version == selection.search {
                write_indexes.push(Arc::clone(&search_index));
            } else {
                write_indexes.push(factory.create(def.require_schema(version)?)?);
            }
        }

        let collection = def.collection();
        collection.set_search_index(search_index);
        for index in write_indexes {
            collection.add_write_index(index);
        }
        tracing::info!(
            index = name,
            search = selection.search,
            write = ?selection.write,
            "initialised index"
        );

        self.mark_not_ready(name, &versions, &selection.write)?;

        let mut reindexers = self.reindexers.lock();
        if !reindexers.contains_key(name) {
            let reindexer = OnlineReindexer::spawn(
                Arc::clone(def),
                selection.search,
                selection.upgrade_target(),
                self.listeners.clone(),
            )?;
            reindexers.insert(name.to_string(), Arc::new(reindexer));
        }
        Ok(())
    }

    /// Clear the ready flag of every existing version that is not written to.
    fn mark_not_ready(&self, name: &str, versions: &BTreeMap<u32, Version>, write: &[u32]) -> Result<()> {
        let mut status = self.status.lock();
        let mut dirty = false;
        for v in versions.values() {
            if !v.exists || write.contains(&v.version) {
                continue;
            }
            if status.get_ready(name, v.version) {
                status.set_ready(name, v.version, false);
                tracing::info!(index = name, version = v.version, "marked stale index version not ready");
                dirty = true;
            }
        }
        if dirty {
            status.save()?;
        }
        Ok(())
    }

    /// Start the background upgrade of every index whose write target is
    /// ahead of its search version.
    pub fn start_online_upgrade(&self) -> Result<()> {
        if !self.online_upgrade {
            return Err(IndexError::OnlineUpgradeDisabled);
        }
        for def in self.defs.values() {
            let collection = def.collection();
            let search = collection.search_version();
            let latest_write = collection.write_versions().last().copied();
            if latest_write.is_some() && latest_write != search {
                self.reindexer(def.name())?.start()?;
            }
        }
        Ok(())
    }

    /// Start reindexing `name`. Unless `force`, nothing happens when searches
    /// already use the target version.
    pub fn start_reindexer(&self, name: &str, force: bool) -> Result<bool> {
        self.reindexer(name)?.start_exclusive(force)
    }

    /// Promote the upgrade target of `name` without reindexing.
    pub fn activate_latest_index(&self, name: &str) -> Result<bool> {
        self.reindexer(name)?.activate_if_behind()
    }

    pub fn is_latest_index_version(&self, name: &str) -> Result<bool> {
        let reindexer = self.reindexer(name)?;
        let def = self.definition(name)?;
        Ok(def.collection().search_version() == Some(reindexer.version()))
    }

    pub fn reindexer_status(&self, name: &str) -> Result<ReindexerStatus> {
        self.reindexer(name)?.status()
    }

    fn reindexer(&self, name: &str) -> Result<Arc<OnlineReindexer>> {
        self.definition(name)?;
        self.reindexers
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::UnknownIndex(name.to_string()))
    }

    /// Stop every reindexer, letting in-flight runs finish.
    pub fn stop(&self) {
        let reindexers: Vec<_> = self.reindexers.lock().drain().collect();
        for (name, reindexer) in reindexers {
            tracing::debug!(index = %name, "stopping reindexer");
            reindexer.shutdown();
        }
    }
}

/// Lifecycle step that kicks off online upgrades once serving has begun.
pub struct OnlineUpgrader {
    manager: Arc<VersionManager>,
}

impl OnlineUpgrader {
    pub fn new(manager: Arc<VersionManager>) -> Self {
        Self { manager }
    }

    pub fn start(&self) -> Result<()> {
        self.manager.start_online_upgrade()
    }
}
