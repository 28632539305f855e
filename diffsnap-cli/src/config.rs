//! Configuration file handling.
//!
//! The configuration is a TOML file. Besides the user settings it carries the
//! bookkeeping that decides when the next full backup is due; diffsnap
//! rewrites the file after every run.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use diffsnap_engine::executor::record::write_replace;
use diffsnap_engine::fs::ignore::IgnoreFilter;
use diffsnap_engine::{BackupKind, BackupPlan, CompareMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Written when no configuration file exists yet
pub const CONFIG_TEMPLATE: &str = r#"# diffsnap configuration (TOML, https://toml.io)

# Directories to back up. Each becomes a folder named after its last path
# segment inside every backup, so those names must differ.
source-directories = [

]

# Prefix of every backup directory: "/mnt/backup/home" produces
# "/mnt/backup/home_Full_<timestamp>" and "/mnt/backup/home_Differential_<timestamp>".
destination = ""

# Regular expressions matched against the beginning of every file and
# directory name. Matching items are skipped. Escape special characters.
ignored = [

]

# Differential backups to run before the next full backup.
differential-backups = 6

# Detect changes by content hash (true) or by modification time (false).
use-content-hash = true

# Pack every backup into a .tar.zst archive.
compress = true
compression-level = 3

# Where the record of the last full backup and the run statistics are kept.
# Relative paths are resolved against this file's directory.
record-file = "hashes.toml"
stats-file = "stats.json"

# Source directories copied at the same time.
max-concurrent-sources = 1

log-level = "info"

# Maintained by diffsnap, normally left alone.
current-differential-backups = 0
last-full = "never"
last-full-timestamp = 0.0
last-differential = "never"
last-differential-timestamp = 0.0
"#;

/// Human-readable format of the `last-*` fields
const LAST_RUN_FORMAT: &str = "%m/%d/%Y %a %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupConfig {
    /// Directories to back up, in order
    pub source_directories: Vec<PathBuf>,

    /// Prefix of every backup directory
    pub destination: String,

    /// Ignore patterns
    #[serde(default)]
    pub ignored: Vec<String>,

    /// Differential backups between two full backups
    #[serde(default = "default_differential_backups")]
    pub differential_backups: u32,

    /// Content hash (true) or modification time (false)
    #[serde(default = "default_true")]
    pub use_content_hash: bool,

    /// Archive finished backups
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Compression level (1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    #[serde(default = "default_record_file")]
    pub record_file: PathBuf,

    #[serde(default = "default_stats_file")]
    pub stats_file: PathBuf,

    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub current_differential_backups: u32,

    #[serde(default = "default_never")]
    pub last_full: String,

    #[serde(default)]
    pub last_full_timestamp: f64,

    #[serde(default = "default_never")]
    pub last_differential: String,

    #[serde(default)]
    pub last_differential_timestamp: f64,
}

// Default values
fn default_differential_backups() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> i32 {
    3
}

fn default_record_file() -> PathBuf {
    PathBuf::from("hashes.toml")
}

fn default_stats_file() -> PathBuf {
    PathBuf::from("stats.json")
}

fn default_max_concurrent_sources() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_never() -> String {
    "never".to_string()
}

impl BackupConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: BackupConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load the configuration, or write the template and return `None` when
    /// there is no file yet.
    pub fn load_or_create(path: &Path) -> Result<Option<Self>> {
        if path.exists() {
            return Self::from_file(path).map(Some);
        }

        write_replace(path, CONFIG_TEMPLATE.as_bytes())
            .with_context(|| format!("cannot create config file {}", path.display()))?;
        Ok(None)
    }

    /// Save the configuration, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string(self).context("cannot encode configuration")?;
        write_replace(path, content.as_bytes())
            .with_context(|| format!("cannot write config file {}", path.display()))
    }

    /// Reject configurations that cannot produce a sound backup.
    ///
    /// Runs before anything on disk is touched.
    pub fn validate(&self) -> Result<()> {
        if self.source_directories.is_empty() {
            bail!("source-directories is empty");
        }
        if self.destination.trim().is_empty() {
            bail!("destination is empty");
        }
        if !(1..=22).contains(&self.compression_level) {
            bail!("compression-level must be between 1 and 22, got {}", self.compression_level);
        }
        if self.max_concurrent_sources == 0 {
            bail!("max-concurrent-sources must be at least 1");
        }

        let mut seen = HashSet::new();
        let mut names = HashSet::new();
        for source in &self.source_directories {
            if source.as_os_str().is_empty() {
                bail!("source-directories contains an empty path");
            }
            if !source.is_dir() {
                bail!("source directory {} does not exist or is not a directory", source.display());
            }

            let absolute = std::path::absolute(source)
                .with_context(|| format!("cannot resolve {}", source.display()))?;
            if !seen.insert(absolute) {
                bail!("source directory {} is listed twice", source.display());
            }

            let Some(name) = source.file_name() else {
                bail!("source directory {} has no final path segment", source.display());
            };
            if !names.insert(name.to_os_string()) {
                bail!(
                    "two source directories are named '{}'; they would overwrite each other",
                    name.to_string_lossy()
                );
            }
        }

        IgnoreFilter::new(&self.ignored)?;

        Ok(())
    }

    pub fn compare_mode(&self) -> CompareMode {
        CompareMode::from_use_content_hash(self.use_content_hash)
    }

    /// Kind of the next backup: `forced` if given, otherwise a full backup
    /// when none was ever made or the differential budget is used up.
    pub fn select_kind(&self, forced: Option<BackupKind>) -> BackupKind {
        if let Some(kind) = forced {
            return kind;
        }

        if self.last_full_timestamp == 0.0
            || self.current_differential_backups >= self.differential_backups
        {
            BackupKind::Full
        } else {
            BackupKind::Differential
        }
    }

    /// Update the bookkeeping after a successful run.
    pub fn mark_completed(&mut self, kind: BackupKind, at: DateTime<Local>, increment: bool) {
        let label = at.format(LAST_RUN_FORMAT).to_string();
        let timestamp = at.timestamp_millis() as f64 / 1000.0;

        match kind {
            BackupKind::Full => {
                self.current_differential_backups = 0;
                self.last_full = label;
                self.last_full_timestamp = timestamp;
            }
            BackupKind::Differential => {
                if increment {
                    self.current_differential_backups += 1;
                }
                self.last_differential = label;
                self.last_differential_timestamp = timestamp;
            }
        }
    }

    pub fn reset_counter(&mut self) {
        self.current_differential_backups = 0;
    }

    /// `path` as is when absolute, otherwise relative to `base`.
    pub fn resolve(base: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }

    /// Build the engine plan. `base` is the directory holding the config file.
    pub fn plan(&self, base: &Path) -> Result<BackupPlan> {
        let sources = self
            .source_directories
            .iter()
            .map(|source| {
                std::path::absolute(source).with_context(|| format!("cannot resolve {}", source.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BackupPlan {
            sources,
            destination: self.destination.clone(),
            ignored: self.ignored.clone(),
            mode: self.compare_mode(),
            record_path: Self::resolve(base, &self.record_file),
            max_concurrent_sources: self.max_concurrent_sources,
        })
    }
}
