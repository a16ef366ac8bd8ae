//! Reference storage backend
//!
//! A directory-per-version document store plus a site indexer fed from a
//! document source. Enough to run the version management engine end to end;
//! no full-text machinery.
//!
//! On-disk layout under `<site>/index/`:
//!
//! ```text
//! changes_0010/documents.json
//! changes_0011/documents.json
//! gerrit_index.config
//! ```

pub mod directory;
pub mod source;

pub use directory::{DirectoryIndex, DirectoryIndexFactory, DOCUMENTS_FILE};
pub use source::{project, DocumentSource, JsonFileSource, MemorySource, SourceSiteIndexer};
