//! Application - owns every component and sequences startup and shutdown
//!
//! # Architecture
//!
//! Construction wires components explicitly; nothing starts until
//! [`Application::start`]:
//!
//! 1. `VersionManager::start` picks search/write versions (fatal on failure)
//! 2. `ReindexingController` reindexes flagged indexes on a one-shot thread
//! 3. `OnlineUpgrader` starts background upgrades, if enabled
//!
//! [`Application::stop`] runs in reverse: reindexers finish their current
//! run, the startup reindex thread is joined, the batch executor drains, and
//! search indexes are closed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::SiteConfig;
use crate::controller::ReindexingController;
use crate::error::{IndexError, Result};
use crate::executor::BatchExecutor;
use crate::index::{IndexDefinition, ReindexResult};
use crate::listener::UpgradeListeners;
use crate::single_version::SingleVersionListener;
use crate::status::{IndexStatusStore, SharedStatus};
use crate::storage::{DirectoryIndexFactory, JsonFileSource, SourceSiteIndexer};
use crate::version_manager::{OnlineUpgrader, VersionManager};
use crate::version_reindexer::IndexVersionReindexer;

pub struct Application {
    site: PathBuf,
    config: SiteConfig,
    status: SharedStatus,
    defs: Vec<Arc<IndexDefinition>>,
    manager: Arc<VersionManager>,
    executor: Arc<BatchExecutor>,
    version_reindexer: Arc<IndexVersionReindexer>,
    controller: ReindexingController,
    upgrader: Option<OnlineUpgrader>,
    startup_reindex: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Application {
    /// Wire the components for `defs`. Listeners registered on `listeners`
    /// before or after construction are notified of online upgrades.
    pub fn new(
        site: impl Into<PathBuf>,
        config: SiteConfig,
        defs: Vec<Arc<IndexDefinition>>,
        status: SharedStatus,
        listeners: UpgradeListeners,
    ) -> Result<Self> {
        let executor = Arc::new(BatchExecutor::new("index-batch", config.index.batch_threads())?);
        let version_reindexer = Arc::new(IndexVersionReindexer::new(Arc::clone(&executor)));
        let manager = Arc::new(VersionManager::new(
            defs.iter().cloned(),
            Arc::clone(&status),
            config.index.online_upgrade,
            listeners,
        ));
        let controller = ReindexingController::new(
            defs.clone(),
            config.index.reindex_on_start.iter().cloned(),
            Arc::clone(&version_reindexer),
        );
        let upgrader = config
            .index
            .online_upgrade
            .then(|| OnlineUpgrader::new(Arc::clone(&manager)));

        Ok(Self {
            site: site.into(),
            config,
            status,
            defs,
            manager,
            executor,
            version_reindexer,
            controller,
            upgrader,
            startup_reindex: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Build the directory-backed indexes described by `config` under `site`.
    pub fn from_site_config(site: impl Into<PathBuf>, config: SiteConfig) -> Result<Self> {
        let site = site.into();
        let status = IndexStatusStore::open_shared(config.status_path(&site))?;
        let index_root = config.index_root(&site);

        let mut defs = Vec::with_capacity(config.definitions.len());
        for def in &config.definitions {
            let factory = DirectoryIndexFactory::new(&index_root, def.name.clone(), Arc::clone(&status));
            let indexer = SourceSiteIndexer::new(JsonFileSource::new(def.source_path(&site)));
            defs.push(Arc::new(IndexDefinition::new(
                def.name.clone(),
                def.schemas(),
                Arc::new(factory),
                Arc::new(indexer),
            )?));
        }

        Self::new(site, config, defs, status, UpgradeListeners::new())
    }

    pub fn site(&self) -> &Path {
        &self.site
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn status(&self) -> &SharedStatus {
        &self.status
    }

    pub fn definitions(&self) -> &[Arc<IndexDefinition>] {
        &self.defs
    }

    pub fn manager(&self) -> &Arc<VersionManager> {
        &self.manager
    }

    pub fn listeners(&self) -> &UpgradeListeners {
        self.manager.listeners()
    }

    pub fn version_reindexer(&self) -> &Arc<IndexVersionReindexer> {
        &self.version_reindexer
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.start_components() {
            tracing::error!(error = %e, code = e.code(), "index subsystem failed to start");
            self.abort_start();
            return Err(e);
        }

        tracing::info!(
            site = %self.site.display(),
            indexes = self.defs.len(),
            online_upgrade = self.config.index.online_upgrade,
            "index subsystem started"
        );
        Ok(())
    }

    fn start_components(&self) -> Result<()> {
        self.manager.start()?;

        let handle = self.controller.start()?;
        *self.startup_reindex.lock() = Some(handle);

        if let Some(upgrader) = &self.upgrader {
            upgrader.start()?;
        }
        Ok(())
    }

    /// Undo a partial start so a later `start()` runs every step again. The
    /// batch executor stays up.
    fn abort_start(&self) {
        self.manager.stop();
        if let Some(handle) = self.startup_reindex.lock().take() {
            if handle.join().is_err() {
                tracing::error!("reindex on start thread panicked");
            }
        }
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.manager.stop();
        if let Some(handle) = self.startup_reindex.lock().take() {
            if handle.join().is_err() {
                tracing::error!("reindex on start thread panicked");
            }
        }
        self.executor.shutdown();
        for def in &self.defs {
            if let Some(index) = def.collection().search_index() {
                index.close();
            }
        }
        tracing::info!("index subsystem stopped");
    }

    /// Rebuild one version of `name` while the site is not serving.
    ///
    /// The version (latest schema by default) is opened as the only index,
    /// reindexed on the batch executor and marked ready when the run
    /// succeeds. Nothing else is activated.
    pub fn reindex_offline(&self, name: &str, version: Option<u32>, reuse: bool) -> Result<ReindexResult> {
        if self.is_started() {
            return Err(IndexError::Reindex(
                "offline reindex requires a stopped index subsystem".to_string(),
            ));
        }
        let def = Arc::clone(self.manager.definition(name)?);
        let version = match version {
            Some(version) => def.require_schema(version)?.version(),
            None => def.latest().version(),
        };

        SingleVersionListener::new(vec![Arc::clone(&def)], HashMap::from([(name.to_string(), version)]))
            .start()?;
        let result = self
            .version_reindexer
            .reindex(Arc::clone(&def), version, reuse, true)?
            .get()?;

        if result.success() {
            if let Some(index) = def.collection().write_index(version) {
                index.mark_ready(true)?;
            }
            tracing::info!(index = name, version, done = result.done_count(), "offline reindex marked version ready");
        }
        Ok(result)
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.stop();
    }
}
