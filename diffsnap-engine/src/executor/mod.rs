//! Backup orchestration.
//!
//! A run goes through these steps:
//! - load the baseline record store (differential runs only)
//! - prepare the run directory, asking before replacing an existing one
//! - mirror every source directory into its own subdirectory
//! - persist the rebuilt record store (full runs only)
//! - hand the run directory to the archiver

pub mod phase;
pub mod record;

use crate::fs::ignore::IgnoreFilter;
use crate::fs::mirror::{is_empty_dir, ItemFailure, MirrorReport, TreeMirror};
use crate::report::{BackupKind, MirrorTotals, RunStats};
use crate::sync::fingerprint::CompareMode;
use crate::{BackupError, Result};
use chrono::{DateTime, Local};
use phase::{PhaseTracker, RunPhase};
use record::RecordStore;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timestamp part of run directory and archive names
pub const STAMP_FORMAT: &str = "%m-%d-%Y_%a_%H-%M-%S";

/// Decides whether an existing run directory may be replaced
pub trait OverwriteDecider: Send + Sync {
    fn confirm_overwrite(&self, path: &Path) -> bool;
}

/// Always gives the same answer
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub bool);

impl OverwriteDecider for FixedDecision {
    fn confirm_overwrite(&self, _path: &Path) -> bool {
        self.0
    }
}

/// Packs a finished run directory
pub trait Archiver: Send + Sync {
    /// Pack `members` (directories inside `run_dir`) into an archive named
    /// after `stem` and return the archive path.
    fn archive(&self, run_dir: &Path, stem: &str, members: &[PathBuf]) -> Result<PathBuf>;
}

/// What to back up and where
#[derive(Debug, Clone)]
pub struct BackupPlan {
    /// Source directories, in backup order
    pub sources: Vec<PathBuf>,

    /// Prefix of every run directory
    pub destination: String,

    /// Ignore patterns
    pub ignored: Vec<String>,

    /// Comparison mode
    pub mode: CompareMode,

    /// Record store location
    pub record_path: PathBuf,

    /// Source directories mirrored at the same time
    pub max_concurrent_sources: usize,
}

/// Result of one backup invocation
#[derive(Debug)]
pub struct RunRecord {
    pub kind: BackupKind,
    pub started_at: DateTime<Local>,
    pub totals: MirrorTotals,
    pub failures: Vec<ItemFailure>,
    pub ignored: u64,
    pub run_dir: PathBuf,
    pub archive: Option<PathBuf>,
    /// Entries written to the record store (full runs only)
    pub records_written: Option<usize>,
    pub elapsed: Duration,
    pub phases: Vec<RunPhase>,
}

impl RunRecord {
    pub fn stats(&self) -> RunStats {
        RunStats::new(self.kind, self.totals, self.started_at)
    }
}

/// Runs full and differential backups for a plan
pub struct BackupRunner {
    plan: BackupPlan,
    filter: Arc<IgnoreFilter>,
    decider: Arc<dyn OverwriteDecider>,
    archiver: Option<Arc<dyn Archiver>>,
}

impl BackupRunner {
    /// Validate `plan` and compile its ignore patterns.
    pub fn new(plan: BackupPlan, decider: Arc<dyn OverwriteDecider>) -> Result<Self> {
        if plan.sources.is_empty() {
            return Err(BackupError::Config("no source directories configured".into()));
        }
        if plan.destination.trim().is_empty() {
            return Err(BackupError::Config("destination is empty".into()));
        }

        let mut names = HashSet::new();
        for source in &plan.sources {
            let name = source_name(source)?;
            if !names.insert(name.to_os_string()) {
                return Err(BackupError::Config(format!(
                    "more than one source directory is named '{}'",
                    name.to_string_lossy()
                )));
            }
        }

        let filter = IgnoreFilter::new(&plan.ignored)?;
        debug!("Compiled {} ignore pattern(s)", filter.len());

        Ok(Self {
            plan,
            filter: Arc::new(filter),
            decider,
            archiver: None,
        })
    }

    /// Archive every run with `archiver`.
    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    pub async fn run_full(&self) -> Result<RunRecord> {
        self.run(BackupKind::Full, Local::now()).await
    }

    /// Fails with `RecordNotFound` when no full backup has recorded a
    /// baseline yet.
    pub async fn run_differential(&self) -> Result<RunRecord> {
        self.run(BackupKind::Differential, Local::now()).await
    }

    /// Run a backup of `kind` stamped with `now`.
    pub async fn run(&self, kind: BackupKind, now: DateTime<Local>) -> Result<RunRecord> {
        let mut tracker = PhaseTracker::new(kind);
        let result = self.execute(kind, now, &mut tracker).await;

        match result {
            Ok(mut record) => {
                record.phases = tracker.history().to_vec();
                Ok(record)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        kind: BackupKind,
        now: DateTime<Local>,
        tracker: &mut PhaseTracker,
    ) -> Result<RunRecord> {
        let start_time = Instant::now();
        let mode = self.plan.mode;

        let baseline = match kind {
            BackupKind::Full => RecordStore::new(mode),
            BackupKind::Differential => {
                let path = self.plan.record_path.clone();
                tokio::task::spawn_blocking(move || RecordStore::load(&path, mode)).await??
            }
        };

        let stamp = now.format(STAMP_FORMAT).to_string();
        let run_dir = PathBuf::from(format!("{}_{}_{}", self.plan.destination, kind, stamp));

        info!(
            "Starting {} backup of {} source(s) into {}",
            kind,
            self.plan.sources.len(),
            run_dir.display()
        );

        self.prepare_destination(&run_dir).await?;
        tracker.advance(RunPhase::DestinationPrepared);

        tracker.advance(RunPhase::Mirroring);
        let reports = self.mirror_sources(kind, Arc::new(baseline), &run_dir).await?;

        let mut totals = MirrorTotals::default();
        let mut failures = Vec::new();
        let mut ignored = 0;
        let mut store = RecordStore::new(mode);
        let mut members = Vec::new();

        for (member, report) in reports {
            totals += report.totals;
            failures.extend(report.failures);
            ignored += report.ignored;
            store.extend(report.records);
            members.extend(member);
        }

        info!(
            "Finished copying files: {} files, {} directories, {} bytes ({} skipped)",
            totals.files,
            totals.dirs,
            totals.bytes,
            failures.len()
        );

        let records_written = match kind {
            BackupKind::Full => {
                let count = store.len();
                let path = self.plan.record_path.clone();
                let persisted = tokio::task::spawn_blocking(move || store.persist(&path)).await?;
                if let Err(e) = persisted {
                    error!("Record store NOT saved, the next differential backup would be wrong: {}", e);
                    return Err(e);
                }
                tracker.advance(RunPhase::RecordPersisted);
                Some(count)
            }
            BackupKind::Differential => None,
        };

        let archive = self.archive(&run_dir, &format!("{}_{}", kind, stamp), members).await;
        tracker.advance(RunPhase::Archived);

        tracker.advance(RunPhase::Done);
        info!("{} backup completed", kind);

        Ok(RunRecord {
            kind,
            started_at: now,
            totals,
            failures,
            ignored,
            run_dir,
            archive,
            records_written,
            elapsed: start_time.elapsed(),
            phases: Vec::new(),
        })
    }

    /// Create the run directory, replacing an existing one only if the
    /// decider agrees.
    async fn prepare_destination(&self, run_dir: &Path) -> Result<()> {
        let destination_err = |source: std::io::Error| BackupError::Destination {
            path: run_dir.to_path_buf(),
            source,
        };

        if tokio::fs::try_exists(run_dir).await.map_err(destination_err)? {
            let decider = Arc::clone(&self.decider);
            let path = run_dir.to_path_buf();
            let confirmed = tokio::task::spawn_blocking(move || decider.confirm_overwrite(&path)).await?;
            if !confirmed {
                return Err(BackupError::DestinationDeclined(run_dir.to_path_buf()));
            }

            warn!("Replacing existing {}", run_dir.display());
            tokio::fs::remove_dir_all(run_dir).await.map_err(destination_err)?;
        }

        // The parent of the prefix must already exist, so an unmounted
        // backup volume fails here instead of filling the mount point.
        tokio::fs::create_dir(run_dir).await.map_err(destination_err)
    }

    /// Mirror every source on a blocking worker. Reports come back in source
    /// order, each with its destination directory unless it was pruned.
    async fn mirror_sources(
        &self,
        kind: BackupKind,
        baseline: Arc<RecordStore>,
        run_dir: &Path,
    ) -> Result<Vec<(Option<PathBuf>, MirrorReport)>> {
        let semaphore = Arc::new(Semaphore::new(self.plan.max_concurrent_sources.max(1)));
        let mut handles = Vec::with_capacity(self.plan.sources.len());

        for source in &self.plan.sources {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| BackupError::Config(format!("worker pool closed: {}", e)))?;

            let source = source.clone();
            let target = run_dir.join(source_name(&source)?);
            let filter = Arc::clone(&self.filter);
            let baseline = Arc::clone(&baseline);
            let mode = self.plan.mode;

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                mirror_source(kind, mode, &filter, &baseline, &source, &target)
            }));
        }

        collect_in_order(handles).await
    }

    async fn archive(&self, run_dir: &Path, stem: &str, members: Vec<PathBuf>) -> Option<PathBuf> {
        let archiver = Arc::clone(self.archiver.as_ref()?);

        if members.is_empty() {
            info!("Nothing was copied, skipping archive");
            return None;
        }

        info!("Archiving {}", run_dir.display());
        let run_dir = run_dir.to_path_buf();
        let stem = stem.to_string();
        let result = tokio::task::spawn_blocking(move || archiver.archive(&run_dir, &stem, &members)).await;

        match result {
            Ok(Ok(path)) => {
                info!("Created archive {}", path.display());
                Some(path)
            }
            Ok(Err(e)) => {
                warn!("Archive creation failed, keeping the uncompressed backup: {}", e);
                None
            }
            Err(e) => {
                warn!("Archive task failed, keeping the uncompressed backup: {}", e);
                None
            }
        }
    }
}

/// Mirror one source into `target`, creating it first. An empty `target`
/// left by a differential run is removed.
fn mirror_source(
    kind: BackupKind,
    mode: CompareMode,
    filter: &IgnoreFilter,
    baseline: &RecordStore,
    source: &Path,
    target: &Path,
) -> Result<(Option<PathBuf>, MirrorReport)> {
    std::fs::create_dir(target).map_err(|e| BackupError::Destination {
        path: target.to_path_buf(),
        source: e,
    })?;

    info!("Backing up {} into {}", source.display(), target.display());
    let report = TreeMirror::new(kind, mode, filter, baseline).mirror(source, target);

    let member = match kind {
        BackupKind::Full => Some(target.to_path_buf()),
        BackupKind::Differential => prune_if_empty(target),
    };

    Ok((member, report))
}

/// Remove `target` if it is an empty directory. Returns it when it stays,
/// including when removal fails.
fn prune_if_empty(target: &Path) -> Option<PathBuf> {
    if !is_empty_dir(target) {
        return Some(target.to_path_buf());
    }

    match std::fs::remove_dir(target) {
        Ok(()) => {
            debug!("Pruned empty directory {}", target.display());
            None
        }
        Err(e) => {
            warn!("Cannot prune {}: {}", target.display(), e);
            Some(target.to_path_buf())
        }
    }
}

/// Await every worker, in order, and return the first error only once all
/// of them have finished so none is still writing when the run fails.
async fn collect_in_order<T>(handles: Vec<JoinHandle<Result<T>>>) -> Result<Vec<T>> {
    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;

    for handle in handles {
        match handle.await {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(BackupError::from(e));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Last path segment of a source directory.
fn source_name(source: &Path) -> Result<&std::ffi::OsStr> {
    source.file_name().ok_or_else(|| {
        BackupError::Config(format!(
            "source directory '{}' has no final path segment",
            source.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Workspace {
        temp: TempDir,
    }

    impl Workspace {
        /// Source `docs` holds `a.txt` (100 bytes) and `sub/b.txt` (50 bytes).
        fn new() -> std::io::Result<Self> {
            let temp = TempDir::new()?;
            let docs = temp.path().join("src/docs");
            fs::create_dir_all(docs.join("sub"))?;
            fs::write(docs.join("a.txt"), vec![b'a'; 100])?;
            fs::write(docs.join("sub/b.txt"), vec![b'b'; 50])?;
            fs::create_dir(temp.path().join("backups"))?;
            Ok(Self { temp })
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.temp.path().join(rel)
        }

        fn plan(&self, mode: CompareMode) -> BackupPlan {
            BackupPlan {
                sources: vec![self.path("src/docs")],
                destination: self.path("backups/home").to_string_lossy().into_owned(),
                ignored: Vec::new(),
                mode,
                record_path: self.path("state/hashes.toml"),
                max_concurrent_sources: 1,
            }
        }

        fn runner(&self, plan: BackupPlan) -> BackupRunner {
            BackupRunner::new(plan, Arc::new(FixedDecision(false))).unwrap()
        }

        fn backups(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.path("backups"))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn at(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct RecordingArchiver {
        fail: bool,
        calls: Mutex<Vec<(String, Vec<PathBuf>)>>,
    }

    impl Archiver for RecordingArchiver {
        fn archive(&self, run_dir: &Path, stem: &str, members: &[PathBuf]) -> Result<PathBuf> {
            self.calls.lock().unwrap().push((stem.to_string(), members.to_vec()));
            if self.fail {
                return Err(BackupError::Archive("disk full".into()));
            }
            Ok(run_dir.join(format!("{}.tar.zst", stem)))
        }
    }

    #[tokio::test]
    async fn test_full_then_differential_scenario() -> Result<()> {
        let ws = Workspace::new()?;
        let runner = ws.runner(ws.plan(CompareMode::ContentHash));

        let full = runner.run(BackupKind::Full, at(9)).await?;
        assert_eq!(full.totals, MirrorTotals { bytes: 150, files: 2, dirs: 1 });
        assert_eq!(full.records_written, Some(2));
        assert!(full.run_dir.ends_with("home_Full_03-01-2024_Fri_09-00-00"));
        assert_eq!(fs::read(full.run_dir.join("docs/sub/b.txt"))?, vec![b'b'; 50]);

        let store = RecordStore::load(&ws.path("state/hashes.toml"), CompareMode::ContentHash)?;
        assert_eq!(store.len(), 2);
        assert!(store.get(&ws.path("src/docs/a.txt").to_string_lossy()).is_some());

        fs::write(ws.path("src/docs/a.txt"), vec![b'c'; 80])?;

        let diff = runner.run(BackupKind::Differential, at(10)).await?;
        assert_eq!(diff.totals, MirrorTotals { bytes: 80, files: 1, dirs: 0 });
        assert_eq!(diff.records_written, None);
        assert!(diff.run_dir.join("docs/a.txt").is_file());
        assert!(!diff.run_dir.join("docs/sub").exists());

        // Differential runs leave the record store alone.
        let unchanged = RecordStore::load(&ws.path("state/hashes.toml"), CompareMode::ContentHash)?;
        assert_eq!(unchanged, store);

        Ok(())
    }

    #[tokio::test]
    async fn test_differential_without_changes_prunes_everything() -> Result<()> {
        let ws = Workspace::new()?;
        let runner = ws.runner(ws.plan(CompareMode::ModificationTime));

        runner.run(BackupKind::Full, at(9)).await?;
        let diff = runner.run(BackupKind::Differential, at(10)).await?;

        assert_eq!(diff.totals, MirrorTotals::default());
        assert!(is_empty_dir(&diff.run_dir));

        Ok(())
    }

    #[tokio::test]
    async fn test_differential_requires_record_store() -> Result<()> {
        let ws = Workspace::new()?;
        let runner = ws.runner(ws.plan(CompareMode::ContentHash));

        let result = runner.run(BackupKind::Differential, at(9)).await;

        assert!(matches!(result, Err(BackupError::RecordNotFound(_))));
        assert!(ws.backups().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_mode_mismatch_rejected_before_any_work() -> Result<()> {
        let ws = Workspace::new()?;
        ws.runner(ws.plan(CompareMode::ContentHash))
            .run(BackupKind::Full, at(9))
            .await?;

        let result = ws
            .runner(ws.plan(CompareMode::ModificationTime))
            .run(BackupKind::Differential, at(10))
            .await;

        assert!(matches!(result, Err(BackupError::ModeMismatch { .. })));
        assert_eq!(ws.backups(), vec!["home_Full_03-01-2024_Fri_09-00-00"]);

        Ok(())
    }

    #[tokio::test]
    async fn test_existing_destination_declined() -> Result<()> {
        let ws = Workspace::new()?;
        let existing = ws.path("backups/home_Full_03-01-2024_Fri_09-00-00");
        fs::create_dir(&existing)?;
        fs::write(existing.join("keep.txt"), b"precious")?;

        let result = ws
            .runner(ws.plan(CompareMode::ContentHash))
            .run(BackupKind::Full, at(9))
            .await;

        assert!(matches!(result, Err(BackupError::DestinationDeclined(_))));
        assert_eq!(fs::read(existing.join("keep.txt"))?, b"precious");
        assert!(!existing.join("docs").exists());
        assert!(!ws.path("state/hashes.toml").exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_existing_destination_replaced_when_confirmed() -> Result<()> {
        let ws = Workspace::new()?;
        let existing = ws.path("backups/home_Full_03-01-2024_Fri_09-00-00");
        fs::create_dir(&existing)?;
        fs::write(existing.join("stale.txt"), b"old")?;

        let runner = BackupRunner::new(ws.plan(CompareMode::ContentHash), Arc::new(FixedDecision(true)))?;
        let full = runner.run(BackupKind::Full, at(9)).await?;

        assert!(!existing.join("stale.txt").exists());
        assert!(full.run_dir.join("docs/a.txt").is_file());

        Ok(())
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_record_persisted_despite_item_failures() -> Result<()> {
        let ws = Workspace::new()?;
        std::os::unix::fs::symlink(ws.path("nowhere"), ws.path("src/docs/broken"))?;

        let full = ws
            .runner(ws.plan(CompareMode::ContentHash))
            .run(BackupKind::Full, at(9))
            .await?;

        assert_eq!(full.failures.len(), 1);
        assert_eq!(full.records_written, Some(2));
        assert!(ws.path("state/hashes.toml").is_file());

        Ok(())
    }

    #[tokio::test]
    async fn test_record_persist_failure_is_fatal() -> Result<()> {
        let ws = Workspace::new()?;
        fs::write(ws.path("state"), b"a file where a directory should be")?;

        let result = ws
            .runner(ws.plan(CompareMode::ContentHash))
            .run(BackupKind::Full, at(9))
            .await;

        assert!(matches!(result, Err(BackupError::RecordPersist { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_archiver_receives_members() -> Result<()> {
        let ws = Workspace::new()?;
        let archiver = Arc::new(RecordingArchiver::default());
        let runner = ws
            .runner(ws.plan(CompareMode::ContentHash))
            .with_archiver(archiver.clone());

        let full = runner.run(BackupKind::Full, at(9)).await?;

        let calls = archiver.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Full_03-01-2024_Fri_09-00-00");
        assert_eq!(calls[0].1, vec![full.run_dir.join("docs")]);
        assert_eq!(
            full.archive,
            Some(full.run_dir.join("Full_03-01-2024_Fri_09-00-00.tar.zst"))
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_archive_failure_keeps_tree() -> Result<()> {
        let ws = Workspace::new()?;
        let archiver = Arc::new(RecordingArchiver {
            fail: true,
            ..Default::default()
        });
        let runner = ws
            .runner(ws.plan(CompareMode::ContentHash))
            .with_archiver(archiver);

        let full = runner.run(BackupKind::Full, at(9)).await?;

        assert_eq!(full.archive, None);
        assert!(full.run_dir.join("docs/a.txt").is_file());
        assert_eq!(full.phases.last(), Some(&RunPhase::Done));

        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_sources_in_parallel() -> Result<()> {
        let ws = Workspace::new()?;
        let music = ws.path("src/music");
        fs::create_dir_all(music.join("albums"))?;
        fs::write(music.join("albums/track.flac"), vec![0u8; 300])?;

        let mut plan = ws.plan(CompareMode::ContentHash);
        plan.sources.push(music);
        plan.max_concurrent_sources = 2;

        let full = ws.runner(plan).run(BackupKind::Full, at(9)).await?;

        assert_eq!(full.totals, MirrorTotals { bytes: 450, files: 3, dirs: 2 });
        assert!(full.run_dir.join("music/albums/track.flac").is_file());
        assert_eq!(full.records_written, Some(3));

        Ok(())
    }

    #[tokio::test]
    async fn test_phases_recorded() -> Result<()> {
        let ws = Workspace::new()?;
        let runner = ws.runner(ws.plan(CompareMode::ContentHash));

        let full = runner.run(BackupKind::Full, at(9)).await?;
        assert!(full.phases.contains(&RunPhase::RecordPersisted));

        let diff = runner.run(BackupKind::Differential, at(10)).await?;
        assert!(!diff.phases.contains(&RunPhase::RecordPersisted));
        assert_eq!(diff.phases.last(), Some(&RunPhase::Done));

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_destination_parent_is_fatal() -> Result<()> {
        let ws = Workspace::new()?;
        let mut plan = ws.plan(CompareMode::ContentHash);
        plan.destination = ws.path("unmounted/home").to_string_lossy().into_owned();

        let result = ws.runner(plan).run(BackupKind::Full, at(9)).await;

        assert!(matches!(result, Err(BackupError::Destination { .. })));
        assert!(!ws.path("unmounted").exists());
        assert!(!ws.path("state/hashes.toml").exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_collect_waits_for_every_worker() {
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let slow_finished = Arc::clone(&finished);

        let handles: Vec<JoinHandle<Result<u32>>> = vec![
            tokio::task::spawn_blocking(|| Err(BackupError::Config("first source failed".into()))),
            tokio::task::spawn_blocking(move || {
                std::thread::sleep(Duration::from_millis(100));
                slow_finished.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(2)
            }),
        ];

        let result = collect_in_order(handles).await;

        assert!(matches!(result, Err(BackupError::Config(_))));
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_collect_keeps_order() -> Result<()> {
        let handles: Vec<JoinHandle<Result<u32>>> = vec![
            tokio::task::spawn_blocking(|| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(1)
            }),
            tokio::task::spawn_blocking(|| Ok(2)),
        ];

        assert_eq!(collect_in_order(handles).await?, vec![1, 2]);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_prune_failure_keeps_member() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        let empty = temp.path().join("empty");
        let kept = temp.path().join("kept");
        fs::create_dir(&empty)?;
        fs::create_dir(&kept)?;
        fs::write(kept.join("a.txt"), b"a")?;

        assert_eq!(prune_if_empty(&empty), None);
        assert!(!empty.exists());
        assert_eq!(prune_if_empty(&kept), Some(kept.clone()));

        // rmdir refuses a symbolic link, even one to an empty directory.
        let target = temp.path().join("target");
        let link = temp.path().join("link");
        fs::create_dir(&target)?;
        std::os::unix::fs::symlink(&target, &link)?;

        assert_eq!(prune_if_empty(&link), Some(link.clone()));
        assert!(link.exists());

        Ok(())
    }

    #[test]
    fn test_plan_validation() {
        let plan = |sources: Vec<&str>, destination: &str| BackupPlan {
            sources: sources.into_iter().map(PathBuf::from).collect(),
            destination: destination.to_string(),
            ignored: Vec::new(),
            mode: CompareMode::ContentHash,
            record_path: PathBuf::from("hashes.toml"),
            max_concurrent_sources: 1,
        };
        let decider: Arc<dyn OverwriteDecider> = Arc::new(FixedDecision(false));

        assert!(BackupRunner::new(plan(vec![], "/backups/home"), decider.clone()).is_err());
        assert!(BackupRunner::new(plan(vec!["/data"], " "), decider.clone()).is_err());
        assert!(BackupRunner::new(plan(vec!["/a/docs", "/b/docs/"], "/backups/home"), decider.clone()).is_err());
        assert!(BackupRunner::new(plan(vec!["/"], "/backups/home"), decider.clone()).is_err());
        assert!(BackupRunner::new(plan(vec!["/a/docs", "/b/music"], "/backups/home"), decider).is_ok());
    }
}
