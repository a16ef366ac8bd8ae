//! Persistent per-version "ready" flags.
//!
//! Stored as a git-config style text file:
//!
//! ```text
//! [index "changes_0010"]
//! 	ready = true
//! ```
//!
//! The whole file is loaded into memory on open; `save()` rewrites it through
//! a temp file and a rename, so a crash mid-write leaves the previous contents
//! intact. Legacy files keyed by a bare version number (`[index "7"]`) belong
//! to the changes index and are rewritten to the `<name>_<version>` form on
//! load.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use regex_lite::Regex;

use crate::error::{IndexError, Result};
use crate::schema::index_dir_name;

/// Site-relative location of the status file.
pub const STATUS_FILE: &str = "index/gerrit_index.config";

/// Index name assumed for legacy entries keyed by version only.
pub const LEGACY_INDEX_NAME: &str = "changes";

const SECTION: &str = "index";
const KEY_READY: &str = "ready";

/// Status store shared between the version manager and index instances.
pub type SharedStatus = Arc<Mutex<IndexStatusStore>>;

/// (section, subsection) -> key -> value
type Sections = BTreeMap<(String, Option<String>), BTreeMap<String, String>>;

#[derive(Debug)]
pub struct IndexStatusStore {
    path: PathBuf,
    sections: Sections,
}

impl IndexStatusStore {
    /// Load the store. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sections = match fs::read_to_string(&path) {
            Ok(text) => parse(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Sections::new(),
            Err(e) => return Err(e.into()),
        };

        let mut store = Self { path, sections };
        if store.convert_legacy() {
            store.save()?;
        }
        store.validate()?;
        Ok(store)
    }

    /// Open the store at `path` and wrap it for sharing.
    pub fn open_shared(path: impl Into<PathBuf>) -> Result<SharedStatus> {
        Ok(Arc::new(Mutex::new(Self::open(path)?)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_ready(&mut self, name: &str, version: u32, ready: bool) {
        self.sections
            .entry((SECTION.to_string(), Some(index_dir_name(name, version))))
            .or_default()
            .insert(KEY_READY.to_string(), ready.to_string());
    }

    /// `false` when unset.
    pub fn get_ready(&self, name: &str, version: u32) -> bool {
        self.sections
            .get(&(SECTION.to_string(), Some(index_dir_name(name, version))))
            .and_then(|keys| keys.get(KEY_READY))
            .and_then(|value| parse_bool(value))
            .unwrap_or(false)
    }

    /// Write the store to disk through a temp file and rename.
    pub fn save(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "status".to_string());
        let tmp_path = dir.join(format!(".{}.tmp", file_name));

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(render(&self.sections).as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Rewrite `[index "<version>"]` sections to `[index "changes_<version>"]`.
    ///
    /// Entries whose ready value is not a boolean are left in place untouched.
    /// Returns whether anything was migrated.
    fn convert_legacy(&mut self) -> bool {
        let legacy: Vec<(u32, bool)> = self
            .sections
            .iter()
            .filter(|((section, _), _)| section == SECTION)
            .filter_map(|((_, subsection), keys)| {
                let version: u32 = subsection.as_deref()?.parse().ok()?;
                let ready = parse_bool(keys.get(KEY_READY)?)?;
                Some((version, ready))
            })
            .collect();

        let mut dirty = false;
        for (version, ready) in legacy {
            self.sections
                .remove(&(SECTION.to_string(), Some(version.to_string())));
            self.set_ready(LEGACY_INDEX_NAME, version, ready);
            tracing::info!(
                index = LEGACY_INDEX_NAME,
                version,
                ready,
                "migrated legacy index status entry"
            );
            dirty = true;
        }
        dirty
    }

    fn validate(&self) -> Result<()> {
        for ((section, subsection), keys) in &self.sections {
            if section != SECTION {
                continue;
            }
            let is_legacy = subsection
                .as_deref()
                .map(|s| s.parse::<u32>().is_ok())
                .unwrap_or(false);
            if is_legacy {
                continue;
            }
            if let Some(value) = keys.get(KEY_READY) {
                if parse_bool(value).is_none() {
                    return Err(IndexError::Config(format!(
                        "{}: invalid boolean '{}' for {}.{}.{}",
                        self.path.display(),
                        value,
                        section,
                        subsection.as_deref().unwrap_or(""),
                        KEY_READY
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Load, update and save in one step.
pub fn set_ready_and_save(status: &SharedStatus, name: &str, version: u32, ready: bool) -> Result<()> {
    let mut store = status.lock();
    store.set_ready(name, version, ready);
    store.save()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse(text: &str) -> Result<Sections> {
    let header = Regex::new(r#"^\[\s*([A-Za-z0-9.-]+)\s*(?:"((?:[^"\\]|\\.)*)")?\s*\]$"#)
        .map_err(|e| IndexError::Config(e.to_string()))?;

    let mut sections = Sections::new();
    let mut current: Option<(String, Option<String>)> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            let caps = header.captures(line).ok_or_else(|| {
                IndexError::Config(format!("line {}: invalid section header '{}'", lineno + 1, raw))
            })?;
            let section = caps[1].to_ascii_lowercase();
            let subsection = caps
                .get(2)
                .map(|m| m.as_str().replace("\\\"", "\"").replace("\\\\", "\\"));
            let key = (section, subsection);
            sections.entry(key.clone()).or_default();
            current = Some(key);
            continue;
        }

        let Some(key) = current.as_ref() else {
            return Err(IndexError::Config(format!(
                "line {}: entry outside of any section",
                lineno + 1
            )));
        };

        let (name, value) = match line.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (line, ""),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(IndexError::Config(format!(
                "line {}: invalid key '{}'",
                lineno + 1,
                name
            )));
        }
        sections
            .entry(key.clone())
            .or_default()
            .insert(name.to_ascii_lowercase(), unquote(value));
    }

    Ok(sections)
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '#' | ';' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let mut out = String::with_capacity(value.len() - 2);
        let mut chars = value[1..value.len() - 1].chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => out.extend(chars.next()),
                c => out.push(c),
            }
        }
        out
    } else {
        value.to_string()
    }
}

/// Quote values that would not survive a reload written bare.
fn quote(value: &str) -> String {
    let needs_quotes = value.trim() != value
        || value.contains(|c| matches!(c, ';' | '#' | '"' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn render(sections: &Sections) -> String {
    let mut out = String::new();
    for ((section, subsection), keys) in sections {
        match subsection {
            Some(sub) => {
                let escaped = sub.replace('\\', "\\\\").replace('"', "\\\"");
                out.push_str(&format!("[{} \"{}\"]\n", section, escaped));
            }
            None => out.push_str(&format!("[{}]\n", section)),
        }
        for (key, value) in keys {
            out.push_str(&format!("\t{} = {}\n", key, quote(value)));
        }
    }
    out
}
