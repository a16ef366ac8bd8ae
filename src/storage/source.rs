//! Document sources and the site indexer that drains them into an index.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rayon::prelude::*;
use serde_json::{Map, Value};

use crate::error::{IndexError, Result};
use crate::index::{Document, Index, IndexAllOptions, ReindexResult, SiteIndexer};
use crate::schema::Schema;

/// Everything that should be in an index, keyed by document id.
pub trait DocumentSource: Send + Sync {
    fn documents(&self) -> Result<Vec<(String, Document)>>;
}

impl<T: DocumentSource + ?Sized> DocumentSource for Arc<T> {
    fn documents(&self) -> Result<Vec<(String, Document)>> {
        (**self).documents()
    }
}

/// Source held in memory; handy for tests and embedding.
#[derive(Default)]
pub struct MemorySource {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, doc: Document) {
        self.docs.write().insert(id.into(), doc);
    }

    pub fn remove(&self, id: &str) -> Option<Document> {
        self.docs.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Into<String>> FromIterator<(S, Document)> for MemorySource {
    fn from_iter<T: IntoIterator<Item = (S, Document)>>(iter: T) -> Self {
        let docs = iter.into_iter().map(|(id, doc)| (id.into(), doc)).collect();
        Self { docs: RwLock::new(docs) }
    }
}

impl DocumentSource for MemorySource {
    fn documents(&self) -> Result<Vec<(String, Document)>> {
        Ok(self
            .docs
            .read()
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }
}

/// A JSON file holding one object of `id -> document`. Re-read on every run;
/// a missing file is an empty source.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSource for JsonFileSource {
    fn documents(&self) -> Result<Vec<(String, Document)>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(IndexError::Storage(format!(
                "{}: expected a JSON object of documents",
                self.path.display()
            ))),
        }
    }
}

/// Keep only the fields `schema` declares. `None` for non-object documents.
pub fn project(schema: &Schema, doc: &Document) -> Option<Document> {
    let object = doc.as_object()?;
    let projected: Map<String, Value> = object
        .iter()
        .filter(|(field, _)| schema.has_field(field))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();
    Some(Value::Object(projected))
}

/// Indexes every document of a [`DocumentSource`], shaped to the target
/// index's schema.
pub struct SourceSiteIndexer<S> {
    source: S,
}

impl<S: DocumentSource> SourceSiteIndexer<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: DocumentSource> SiteIndexer for SourceSiteIndexer<S> {
    fn index_all(&self, index: &dyn Index, options: IndexAllOptions) -> Result<ReindexResult> {
        let start = Instant::now();
        let schema = index.schema();
        let documents = self.source.documents()?;
        tracing::debug!(
            version = schema.version(),
            mode = options.mode.as_str(),
            reuse = options.reuse,
            documents = documents.len(),
            "indexing documents"
        );

        let projected: Vec<(String, Option<Document>)> = documents
            .into_par_iter()
            .map(|(id, doc)| {
                let shaped = project(&schema, &doc);
                (id, shaped)
            })
            .collect();

        let mut done = 0u64;
        let mut failed = 0u64;
        for (id, doc) in projected {
            let Some(doc) = doc else {
                tracing::warn!(id = %id, version = schema.version(), "skipping document that is not an object");
                failed += 1;
                continue;
            };
            if options.reuse && index.get(&id).as_ref() == Some(&doc) {
                done += 1;
                continue;
            }
            index.replace(&id, doc)?;
            done += 1;
        }

        Ok(ReindexResult::new(failed == 0, done, failed, start.elapsed()))
    }
}
