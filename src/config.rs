//! Site configuration loaded from YAML.
//!
//! Every field has a default, so a missing file or an empty document is a
//! valid configuration with online upgrades enabled and no indexes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::schema::Schema;
use crate::status::STATUS_FILE;

/// Site-relative directory holding one subdirectory per index version.
pub const INDEX_DIR: &str = "index";

/// Site-relative directory holding the default JSON document sources.
pub const DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Reindex to the latest schema in the background while serving.
    pub online_upgrade: bool,
    /// Batch executor size; 0 means one thread per available CPU.
    pub batch_threads: usize,
    /// Status file, relative to the site directory.
    pub status_file: String,
    /// Indexes reindexed at their search version on startup.
    pub reindex_on_start: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            online_upgrade: true,
            batch_threads: 0,
            status_file: STATUS_FILE.to_string(),
            reindex_on_start: Vec::new(),
        }
    }
}

impl IndexConfig {
    pub fn batch_threads(&self) -> usize {
        if self.batch_threads > 0 {
            return self.batch_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionConfig {
    pub name: String,
    /// Schema version -> indexed fields.
    pub schemas: BTreeMap<u32, Vec<String>>,
    /// JSON document source, relative to the site. Defaults to
    /// `data/<name>.json`.
    #[serde(default)]
    pub source: Option<String>,
}

impl DefinitionConfig {
    pub fn schemas(&self) -> Vec<Schema> {
        self.schemas
            .iter()
            .map(|(version, fields)| Schema::new(*version, fields.iter().cloned()))
            .collect()
    }

    pub fn source_path(&self, site: &Path) -> PathBuf {
        match &self.source {
            Some(source) => site.join(source),
            None => site.join(DATA_DIR).join(format!("{}.json", self.name)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub index: IndexConfig,
    pub definitions: Vec<DefinitionConfig>,
}

impl SiteConfig {
    /// Load and validate `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no site config; using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config = Self::parse(&text)
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: SiteConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn status_path(&self, site: &Path) -> PathBuf {
        site.join(&self.index.status_file)
    }

    pub fn index_root(&self, site: &Path) -> PathBuf {
        site.join(INDEX_DIR)
    }

    pub fn definition(&self, name: &str) -> Option<&DefinitionConfig> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for def in &self.definitions {
            validate_name(&def.name)?;
            if !names.insert(def.name.as_str()) {
                return Err(IndexError::Config(format!("duplicate index '{}'", def.name)));
            }
            if def.schemas.is_empty() {
                return Err(IndexError::Config(format!(
                    "index '{}' declares no schema versions",
                    def.name
                )));
            }
        }
        for name in &self.index.reindex_on_start {
            if !names.contains(name.as_str()) {
                return Err(IndexError::Config(format!(
                    "reindex_on_start names unknown index '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Allowed characters: [a-zA-Z0-9_-], length 1-128.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 {
        return Err(IndexError::Config(
            "Index name must be 1-128 characters".to_string(),
        ));
    }

    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(IndexError::Config(format!(
            "Index name '{}' can only contain a-z, A-Z, 0-9, _, -",
            name
        )));
    }

    Ok(())
}
