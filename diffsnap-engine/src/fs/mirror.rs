//! Recursive tree mirroring with change detection.
//!
//! [`TreeMirror`] walks a source directory depth-first and reproduces it
//! under a destination directory. A full run copies every file that is not
//! ignored and reports the fingerprint of each copy. A differential run copies
//! only files whose fingerprint differs from the baseline record store, and
//! removes every destination directory that ends up empty as soon as its
//! subtree is done.
//!
//! Symbolic links are resolved: a link to a file is copied as a regular file
//! holding the target's contents, and a link to a directory is descended like
//! a directory unless it points back to one of its own ancestors. Broken links
//! and special files (FIFOs, sockets, devices) are reported as item failures,
//! as are files whose path is not valid UTF-8. A failed copy leaves nothing
//! behind in the mirror.

use crate::executor::record::RecordStore;
use crate::fs::ignore::IgnoreFilter;
use crate::fs::metadata::copy_with_metadata;
use crate::report::{BackupKind, MirrorTotals};
use crate::sync::fingerprint::{self, CompareMode};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// An item that could not be backed up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of mirroring one directory tree
#[derive(Debug, Default)]
pub struct MirrorReport {
    /// What was copied
    pub totals: MirrorTotals,

    /// Fingerprints of the files copied by a full run, keyed by absolute
    /// source path. Always empty for differential runs.
    pub records: Vec<(String, String)>,

    /// Items skipped because of an error
    pub failures: Vec<ItemFailure>,

    /// Items skipped because they matched an ignore pattern
    pub ignored: u64,
}

impl MirrorReport {
    /// Fold a subtree's report into this one.
    pub fn absorb(&mut self, child: MirrorReport) {
        self.totals += child.totals;
        self.records.extend(child.records);
        self.failures.extend(child.failures);
        self.ignored += child.ignored;
    }

    fn fail(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Skipping {}: {}", path.display(), reason);
        self.failures.push(ItemFailure {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// What a directory entry is treated as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Directory,
    File,
    Unsupported,
}

/// Mirrors source trees for one backup run
pub struct TreeMirror<'a> {
    kind: BackupKind,
    mode: CompareMode,
    filter: &'a IgnoreFilter,
    baseline: &'a RecordStore,
}

impl<'a> TreeMirror<'a> {
    /// # Arguments
    /// * `kind` - Full or differential run
    /// * `mode` - How files are fingerprinted
    /// * `filter` - Names to skip entirely
    /// * `baseline` - Record store of the last full backup (only read on
    ///   differential runs)
    pub fn new(
        kind: BackupKind,
        mode: CompareMode,
        filter: &'a IgnoreFilter,
        baseline: &'a RecordStore,
    ) -> Self {
        Self {
            kind,
            mode,
            filter,
            baseline,
        }
    }

    /// Mirror the contents of `source` into the existing directory
    /// `destination`.
    ///
    /// `destination` itself is neither counted nor pruned; that is up to the
    /// caller.
    pub fn mirror(&self, source: &Path, destination: &Path) -> MirrorReport {
        let source = std::path::absolute(source).unwrap_or_else(|_| source.to_path_buf());
        let mut ancestors = Vec::new();
        self.mirror_dir(&source, destination, &mut ancestors)
    }

    fn mirror_dir(&self, source: &Path, destination: &Path, ancestors: &mut Vec<PathBuf>) -> MirrorReport {
        let mut report = MirrorReport::default();
        ancestors.push(fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf()));

        let children = WalkDir::new(source)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in children {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(source).to_path_buf();
                    report.fail(&path, format!("cannot list: {}", e));
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy();
            if self.filter.is_ignored(&name) {
                info!("Skipping {}", entry.path().display());
                report.ignored += 1;
                continue;
            }

            let target = destination.join(entry.file_name());

            match classify(&entry) {
                Ok(ItemKind::Directory) => {
                    if entry.path_is_symlink() && leads_to_ancestor(entry.path(), ancestors) {
                        report.fail(entry.path(), "symbolic link loops back to an ancestor directory");
                        continue;
                    }
                    self.mirror_subdir(entry.path(), &target, ancestors, &mut report);
                }
                Ok(ItemKind::File) => self.mirror_file(entry.path(), &target, &mut report),
                Ok(ItemKind::Unsupported) => report.fail(entry.path(), "unsupported file type"),
                Err(e) => report.fail(entry.path(), format!("cannot resolve symbolic link: {}", e)),
            }
        }

        ancestors.pop();
        report
    }

    fn mirror_subdir(
        &self,
        source: &Path,
        target: &Path,
        ancestors: &mut Vec<PathBuf>,
        report: &mut MirrorReport,
    ) {
        if let Err(e) = fs::create_dir(target) {
            report.fail(source, format!("cannot create {}: {}", target.display(), e));
            return;
        }

        let child = self.mirror_dir(source, target, ancestors);

        if self.kind == BackupKind::Differential && is_empty_dir(target) {
            match fs::remove_dir(target) {
                Ok(()) => debug!("Pruned empty directory {}", target.display()),
                Err(e) => {
                    warn!("Cannot prune {}: {}", target.display(), e);
                    report.totals.dirs += 1;
                }
            }
        } else {
            report.totals.dirs += 1;
        }

        report.absorb(child);
    }

    fn mirror_file(&self, source: &Path, target: &Path, report: &mut MirrorReport) {
        // Record keys are exact paths, so names a lossy conversion would
        // merge cannot be tracked.
        let Some(key) = source.to_str().map(str::to_owned) else {
            report.fail(source, "path is not valid UTF-8");
            return;
        };
        let recorded = match self.kind {
            BackupKind::Full => None,
            BackupKind::Differential => self.baseline.get(&key),
        };

        debug!("Checking file {}", source.display());
        let check = match fingerprint::check(source, recorded, self.mode) {
            Ok(check) => check,
            Err(e) => {
                report.fail(source, format!("cannot read: {}", e));
                return;
            }
        };

        if self.kind == BackupKind::Differential && !check.changed {
            return;
        }

        match copy_with_metadata(source, target) {
            Ok(size) => {
                info!("{} added to backup", source.display());
                report.totals.files += 1;
                report.totals.bytes += size;
                if self.kind == BackupKind::Full {
                    report.records.push((key, check.fingerprint));
                }
            }
            Err(e) => report.fail(source, format!("cannot copy: {}", e)),
        }
    }
}

/// Resolve symbolic links to decide how an entry is mirrored.
fn classify(entry: &DirEntry) -> io::Result<ItemKind> {
    let file_type = if entry.path_is_symlink() {
        fs::metadata(entry.path())?.file_type()
    } else {
        entry.file_type()
    };

    Ok(if file_type.is_dir() {
        ItemKind::Directory
    } else if file_type.is_file() {
        ItemKind::File
    } else {
        ItemKind::Unsupported
    })
}

fn leads_to_ancestor(path: &Path, ancestors: &[PathBuf]) -> bool {
    fs::canonicalize(path)
        .map(|resolved| ancestors.contains(&resolved))
        .unwrap_or(false)
}

/// True if `path` is a directory without entries.
pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
