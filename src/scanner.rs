//! Discover which schema versions of an index exist and which are ready.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::index::IndexDefinition;
use crate::schema::Version;
use crate::status::IndexStatusStore;

/// Scan every version of `def`, lowest first.
///
/// Known schemas are probed through the definition's factory. Versions found
/// in storage without a schema in this binary are reported with
/// `schema: None` so they can still be cleaned up.
pub fn scan_versions(def: &IndexDefinition, status: &IndexStatusStore) -> Result<BTreeMap<u32, Version>> {
    let factory = def.factory();
    let mut versions = BTreeMap::new();

    for (version, schema) in def.schemas() {
        let exists = factory.exists(*version);
        let ready = status.get_ready(def.name(), *version);
        if ready && !exists {
            tracing::warn!(
                index = def.name(),
                version = *version,
                "index version marked ready but storage is missing; treating as not ready"
            );
        }
        versions.insert(*version, Version::new(Some(schema.clone()), *version, exists, ready));
    }

    for version in factory.on_disk_versions()? {
        versions.entry(version).or_insert_with(|| {
            tracing::debug!(index = def.name(), version, "found index version unknown to this binary");
            Version::new(None, version, true, status.get_ready(def.name(), version))
        });
    }

    Ok(versions)
}
