//! Operator-driven reindex of one schema version on the batch executor.
//!
//! Unlike the online reindexer this never activates the result; promoting
//! the version is a separate explicit step.

use std::sync::Arc;

use crate::error::{IndexError, Result};
use crate::executor::{BatchExecutor, ReindexFuture};
use crate::index::{IndexAllOptions, IndexDefinition, ReindexResult};

pub struct IndexVersionReindexer {
    executor: Arc<BatchExecutor>,
}

impl IndexVersionReindexer {
    pub fn new(executor: Arc<BatchExecutor>) -> Self {
        Self { executor }
    }

    /// Queue a full reindex of `version`.
    ///
    /// The version must be known and registered as a write index; both are
    /// checked before anything is queued. With `reuse` the existing contents
    /// are kept and only refreshed.
    pub fn reindex(
        &self,
        def: Arc<IndexDefinition>,
        version: u32,
        reuse: bool,
        notify_listeners: bool,
    ) -> Result<ReindexFuture<ReindexResult>> {
        def.require_schema(version)?;
        let index = def
            .collection()
            .write_index(version)
            .ok_or_else(|| IndexError::MissingWriteIndex {
                name: def.name().to_string(),
                version,
            })?;

        self.executor.submit(move || {
            let name = def.name();
            tracing::info!(index = name, version, reuse, "starting offline reindex");
            if !reuse {
                index.delete_all()?;
            }
            let result = def
                .site_indexer()
                .index_all(&*index, IndexAllOptions::offline(reuse, notify_listeners))?;
            index.flush()?;
            if result.success() {
                tracing::info!(
                    index = name,
                    version,
                    done = result.done_count(),
                    elapsed_ms = result.elapsed().as_millis() as u64,
                    "offline reindex complete"
                );
            } else {
                tracing::warn!(
                    index = name,
                    version,
                    done = result.done_count(),
                    failed = result.failed_count(),
                    "offline reindex finished with failures"
                );
            }
            Ok(result)
        })
    }
}
