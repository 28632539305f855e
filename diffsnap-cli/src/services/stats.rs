//! Persistent history of backup runs.

use anyhow::{Context, Result};
use diffsnap_engine::executor::record::write_replace;
use diffsnap_engine::report::format_bytes;
use diffsnap_engine::{BackupKind, RunStats};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Every run appended in order, stored as JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsLedger {
    pub runs: Vec<RunStats>,
}

/// Aggregate over all runs of one kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindSummary {
    pub runs: usize,
    pub bytes: u64,
    pub files: u64,
    pub dirs: u64,
}

impl StatsLedger {
    /// A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read statistics file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse statistics file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_replace(path, &bytes)
            .with_context(|| format!("Failed to write statistics file: {}", path.display()))
    }

    pub fn record(&mut self, stats: RunStats) {
        self.runs.push(stats);
    }

    pub fn summary(&self, kind: BackupKind) -> KindSummary {
        self.runs
            .iter()
            .filter(|run| run.backup_kind == kind)
            .fold(KindSummary::default(), |mut acc, run| {
                acc.runs += 1;
                acc.bytes += run.total_bytes;
                acc.files += run.total_files;
                acc.dirs += run.total_dirs;
                acc
            })
    }

    /// Text shown by `diffsnap --stats`
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.runs.is_empty() {
            out.push_str("No backups recorded yet.\n");
            return out;
        }

        for kind in [BackupKind::Full, BackupKind::Differential] {
            let summary = self.summary(kind);
            let _ = writeln!(
                out,
                "{:<12} {:>4} runs, {:>6} files, {:>6} directories, {}",
                kind.to_string(),
                summary.runs,
                summary.files,
                summary.dirs,
                format_bytes(summary.bytes)
            );
        }

        if let Some(last) = self.runs.last() {
            let _ = writeln!(
                out,
                "Last run: {} backup on {}, {} copied",
                last.backup_kind,
                last.timestamp.format("%Y-%m-%d %H:%M:%S"),
                format_bytes(last.total_bytes)
            );
        }
        out
    }
}
