//! Secondary index version management and online reindexing.
//!
//! Every logical index (changes, accounts, ...) exists in one or more schema
//! versions. On startup [`VersionManager`] serves queries from the highest
//! ready version and, when a newer schema exists, rebuilds it in the
//! background with an [`OnlineReindexer`] before switching searches over.
//! Ready flags survive restarts in an [`IndexStatusStore`].

pub mod app;
pub mod collection;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod index;
pub mod listener;
pub mod reindexer;
pub mod scanner;
pub mod schema;
pub mod single_version;
pub mod status;
pub mod storage;
pub mod version_manager;
pub mod version_reindexer;

pub use app::Application;
pub use collection::IndexCollection;
pub use config::{DefinitionConfig, IndexConfig, SiteConfig};
pub use controller::ReindexingController;
pub use error::{IndexError, Result};
pub use executor::{BatchExecutor, ReindexFuture};
pub use index::{
    Document, Index, IndexAllOptions, IndexDefinition, IndexFactory, IndexRef, ReindexMode, ReindexResult,
    SiteIndexer,
};
pub use listener::{OnlineUpgradeListener, UpgradeListeners};
pub use reindexer::{OnlineReindexer, ReindexerStatus};
pub use scanner::scan_versions;
pub use schema::{index_dir_name, Schema, Version};
pub use single_version::SingleVersionListener;
pub use status::{IndexStatusStore, SharedStatus};
pub use version_manager::{select_versions, OnlineUpgrader, VersionManager, VersionSelection};
pub use version_reindexer::IndexVersionReindexer;
