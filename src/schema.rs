//! Schema versions and the per-version descriptors produced by a scan.
//!
//! A `Schema` is immutable once defined. Each logical index declares a set of
//! schemas keyed by version number; the highest one is the latest.

use std::sync::Arc;

use regex_lite::Regex;

/// Document field layout of one schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    version: u32,
    fields: Vec<String>,
}

impl Schema {
    pub fn new<I, S>(version: u32, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// State of one schema version of one index, as observed at scan time.
///
/// `schema` is `None` for versions found in storage that this binary no longer
/// knows how to read. `ready` implies `exists`.
#[derive(Debug, Clone)]
pub struct Version {
    pub schema: Option<Arc<Schema>>,
    pub version: u32,
    pub exists: bool,
    pub ready: bool,
}

impl Version {
    pub fn new(schema: Option<Arc<Schema>>, version: u32, exists: bool, ready: bool) -> Self {
        Self {
            schema,
            version,
            exists,
            ready: ready && exists,
        }
    }
}

/// Storage name of an index version: `<name>_<version:04>`.
pub fn index_dir_name(name: &str, version: u32) -> String {
    format!("{}_{:04}", name, version)
}

/// Inverse of [`index_dir_name`]; `None` if `dir_name` does not belong to `name`.
pub fn parse_index_dir_name(name: &str, dir_name: &str) -> Option<u32> {
    let re = Regex::new(r"^(.+)_([0-9]{4,})$").ok()?;
    let caps = re.captures(dir_name)?;
    if &caps[1] != name {
        return None;
    }
    caps[2].parse().ok()
}
