//! Lifecycle of a single backup invocation.

use crate::report::BackupKind;
use std::fmt;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    DestinationPrepared,
    Mirroring,
    /// Full runs only
    RecordPersisted,
    Archived,
    Done,
    Failed,
}

impl RunPhase {
    /// The phase that follows `self` for a run of `kind`.
    pub fn successor(self, kind: BackupKind) -> Option<RunPhase> {
        match (self, kind) {
            (RunPhase::Idle, _) => Some(RunPhase::DestinationPrepared),
            (RunPhase::DestinationPrepared, _) => Some(RunPhase::Mirroring),
            (RunPhase::Mirroring, BackupKind::Full) => Some(RunPhase::RecordPersisted),
            (RunPhase::Mirroring, BackupKind::Differential) => Some(RunPhase::Archived),
            (RunPhase::RecordPersisted, _) => Some(RunPhase::Archived),
            (RunPhase::Archived, _) => Some(RunPhase::Done),
            (RunPhase::Done, _) | (RunPhase::Failed, _) => None,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Records the phases a run passes through
#[derive(Debug)]
pub struct PhaseTracker {
    kind: BackupKind,
    history: Vec<RunPhase>,
}

impl PhaseTracker {
    pub fn new(kind: BackupKind) -> Self {
        Self {
            kind,
            history: vec![RunPhase::Idle],
        }
    }

    pub fn current(&self) -> RunPhase {
        *self.history.last().unwrap_or(&RunPhase::Idle)
    }

    /// Move to the next phase of the run.
    pub fn advance(&mut self, next: RunPhase) {
        debug_assert_eq!(
            self.current().successor(self.kind),
            Some(next),
            "illegal transition {} -> {}",
            self.current(),
            next
        );
        debug!("{} backup: {} -> {}", self.kind, self.current(), next);
        self.history.push(next);
    }

    /// Enter the terminal failure state.
    pub fn fail(&mut self, reason: &dyn fmt::Display) {
        error!("{} backup failed during {}: {}", self.kind, self.current(), reason);
        self.history.push(RunPhase::Failed);
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }
}
