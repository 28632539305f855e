//! diffsnap engine
//!
//! Change detection and tree mirroring for full and differential backups.

pub mod executor;
pub mod fs;
pub mod report;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use executor::record::RecordStore;
pub use executor::{Archiver, BackupPlan, BackupRunner, FixedDecision, OverwriteDecider, RunRecord};
pub use report::{BackupKind, MirrorTotals, RunStats};
pub use sync::fingerprint::CompareMode;
pub use utils::errors::{BackupError, Result};
