//! Record store for differential backup support.
//!
//! The store maps the absolute path of every file copied by the last full
//! backup to its fingerprint. Differential runs compare against it and never
//! write it back, so a change stays visible until the next full backup.
//!
//! On disk it is a TOML document:
//!
//! ```toml
//! mode = "content-hash"
//!
//! [records]
//! "/home/user/docs/a.txt" = "b94d27b9..."
//! ```
//!
//! A flat `path = value` table without the `mode` key is still read; its mode
//! is inferred from the values.

use crate::sync::fingerprint::CompareMode;
use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Path → fingerprint table tagged with the mode that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStore {
    mode: CompareMode,
    records: BTreeMap<String, String>,
}

impl RecordStore {
    /// Create an empty store for `mode`.
    pub fn new(mode: CompareMode) -> Self {
        Self {
            mode,
            records: BTreeMap::new(),
        }
    }

    /// Load the store persisted at `path` and check it against `expected`.
    ///
    /// # Errors
    /// * `RecordNotFound` - No file at `path`
    /// * `RecordCorrupt` - Unparsable file, or values of mixed shapes
    /// * `ModeMismatch` - The store was built with the other comparison mode
    pub fn load(path: &Path, expected: CompareMode) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::RecordNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| BackupError::RecordCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let table: toml::Table =
            toml::from_str(&content).map_err(|e: toml::de::Error| corrupt(e.to_string()))?;

        let store = if table.contains_key("records") {
            let store: RecordStore = toml::Value::Table(table)
                .try_into()
                .map_err(|e: toml::de::Error| corrupt(e.to_string()))?;
            store.verify_shapes().map_err(corrupt)?;
            store
        } else {
            Self::from_legacy(table, expected).map_err(corrupt)?
        };

        if store.mode != expected {
            return Err(BackupError::ModeMismatch {
                path: path.to_path_buf(),
                expected,
                found: store.mode,
            });
        }

        tracing::debug!(
            "Loaded {} records ({}) from {}",
            store.len(),
            store.mode,
            path.display()
        );

        Ok(store)
    }

    /// Read a flat table, inferring the mode from its values.
    fn from_legacy(table: toml::Table, expected: CompareMode) -> std::result::Result<Self, String> {
        let mut records = BTreeMap::new();
        for (key, value) in table {
            match value {
                toml::Value::String(s) => {
                    records.insert(key, s);
                }
                other => {
                    return Err(format!("value for '{}' is a {}, not a string", key, other.type_str()));
                }
            }
        }

        let mode = match records.values().next() {
            Some(sample) => CompareMode::detect(sample)
                .ok_or_else(|| format!("unrecognised fingerprint '{}'", sample))?,
            None => expected,
        };

        let store = Self { mode, records };
        store.verify_shapes()?;
        Ok(store)
    }

    /// Every value must have the shape of the store's mode.
    fn verify_shapes(&self) -> std::result::Result<(), String> {
        match self.records.iter().find(|(_, value)| !self.mode.accepts(value)) {
            Some((key, value)) => Err(format!(
                "value '{}' for '{}' is not a {} fingerprint",
                value, key, self.mode
            )),
            None => Ok(()),
        }
    }

    /// Write the store to `path`, replacing any previous file only once the
    /// new content is fully on disk.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let persist_err = |source: io::Error| BackupError::RecordPersist {
            path: path.to_path_buf(),
            source,
        };

        let content = toml::to_string(self)?;
        write_replace(path, content.as_bytes()).map_err(persist_err)?;

        tracing::info!("Persisted {} records to {}", self.len(), path.display());
        Ok(())
    }

    /// Recorded fingerprint for `path`.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.records.get(path).map(String::as_str)
    }

    /// Record `fingerprint` for `path`, replacing any previous value.
    pub fn set(&mut self, path: impl Into<String>, fingerprint: impl Into<String>) {
        self.records.insert(path.into(), fingerprint.into());
    }

    pub fn mode(&self) -> CompareMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.records.iter()
    }
}

impl Extend<(String, String)> for RecordStore {
    fn extend<I: IntoIterator<Item = (String, String)>>(&mut self, iter: I) {
        self.records.extend(iter);
    }
}

/// Write `bytes` to a sibling temp file, sync it, then rename it over `path`.
pub fn write_replace(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
