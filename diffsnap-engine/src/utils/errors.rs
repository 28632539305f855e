//! Custom error types for the backup engine.

use crate::sync::fingerprint::CompareMode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid ignore pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No record store at {0}; run a full backup first")]
    RecordNotFound(PathBuf),

    #[error("Record store {path} is corrupt: {reason}")]
    RecordCorrupt { path: PathBuf, reason: String },

    #[error("Record store {path} uses {found} comparison but {expected} is configured")]
    ModeMismatch {
        path: PathBuf,
        expected: CompareMode,
        found: CompareMode,
    },

    #[error("Failed to persist record store to {path}: {source}")]
    RecordPersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Destination {0} already exists and overwriting was declined")]
    DestinationDeclined(PathBuf),

    #[error("Cannot prepare destination {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, BackupError>;
