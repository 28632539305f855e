//! File metadata handling for mirrored copies.
//!
//! Copies carry the source's permissions and access/modification times so a
//! mirror can be compared against its source with ordinary tools.

use std::fs::{self, File, FileTimes, Permissions};
use std::io;
use std::path::Path;
use std::time::SystemTime;
use tracing::warn;

/// Metadata carried from a source file to its copy
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last access time
    pub accessed: Option<SystemTime>,

    /// Last modified time
    pub modified: Option<SystemTime>,

    /// Source permissions
    pub permissions: Permissions,
}

impl FileMetadata {
    /// Extract metadata from a file path, following symbolic links.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;

        Ok(Self {
            size: metadata.len(),
            accessed: metadata.accessed().ok(),
            modified: metadata.modified().ok(),
            permissions: metadata.permissions(),
        })
    }

    /// Apply timestamps and permissions through an open handle.
    ///
    /// Times are set before permissions so read-only sources still get their
    /// timestamps.
    pub fn apply_to_file(&self, file: &File) -> io::Result<()> {
        let mut times = FileTimes::new();
        if let Some(accessed) = self.accessed {
            times = times.set_accessed(accessed);
        }
        if let Some(modified) = self.modified {
            times = times.set_modified(modified);
        }

        file.set_times(times)?;
        file.set_permissions(self.permissions.clone())?;

        Ok(())
    }
}

/// Copy `source` to `destination` with its metadata.
///
/// Returns the source size in bytes. On error no partial copy is left at
/// `destination`.
pub fn copy_with_metadata(source: &Path, destination: &Path) -> io::Result<u64> {
    let metadata = FileMetadata::from_path(source)?;

    let mut reader = File::open(source)?;
    let mut writer = File::create(destination)?;
    let copied = io::copy(&mut reader, &mut writer).and_then(|_| metadata.apply_to_file(&writer));

    if let Err(e) = copied {
        drop(writer);
        if let Err(remove_err) = fs::remove_file(destination) {
            warn!("Cannot remove partial copy {}: {}", destination.display(), remove_err);
        }
        return Err(e);
    }

    Ok(metadata.size)
}
