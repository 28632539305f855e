//! Run totals and the statistics emitted after every backup.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::AddAssign;

/// Kind of backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Copies everything and rebuilds the record store
    Full,
    /// Copies only what changed since the last full backup
    Differential,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => f.write_str("Full"),
            BackupKind::Differential => f.write_str("Differential"),
        }
    }
}

/// Bytes, files and directories copied by a (sub)tree mirror
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorTotals {
    pub bytes: u64,
    pub files: u64,
    pub dirs: u64,
}

impl AddAssign for MirrorTotals {
    fn add_assign(&mut self, other: Self) {
        self.bytes += other.bytes;
        self.files += other.files;
        self.dirs += other.dirs;
    }
}

impl Sum for MirrorTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, totals| {
            acc += totals;
            acc
        })
    }
}

/// Statistics handed to the statistics collaborator after each run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_bytes: u64,
    pub total_files: u64,
    pub total_dirs: u64,
    pub backup_kind: BackupKind,
    pub timestamp: DateTime<Local>,
}

impl RunStats {
    pub fn new(kind: BackupKind, totals: MirrorTotals, timestamp: DateTime<Local>) -> Self {
        Self {
            total_bytes: totals.bytes,
            total_files: totals.files,
            total_dirs: totals.dirs,
            backup_kind: kind,
            timestamp,
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
