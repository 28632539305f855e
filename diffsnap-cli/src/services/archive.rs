//! Packing finished backups into `.tar.zst` archives.

use diffsnap_engine::{Archiver, BackupError};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Packs the per-source directories of a run into one tar archive compressed
/// with zstd, then removes the uncompressed copies.
#[derive(Debug, Clone)]
pub struct TarZstdArchiver {
    level: i32,
}

impl TarZstdArchiver {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    fn write_archive(&self, archive_path: &Path, members: &[PathBuf]) -> io::Result<()> {
        let file = File::create(archive_path)?;
        let encoder = zstd::Encoder::new(file, self.level)?;
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        for member in members {
            let name = member.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no name", member.display()))
            })?;
            builder.append_dir_all(Path::new(name), member)?;
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?.sync_all()
    }
}

impl Archiver for TarZstdArchiver {
    fn archive(&self, run_dir: &Path, stem: &str, members: &[PathBuf]) -> diffsnap_engine::Result<PathBuf> {
        let archive_path = run_dir.join(format!("{}.tar.zst", stem));

        if let Err(e) = self.write_archive(&archive_path, members) {
            let _ = fs::remove_file(&archive_path);
            return Err(BackupError::Archive(format!("cannot write {}: {}", archive_path.display(), e)));
        }

        tracing::info!("Finished archiving. Removing working files...");
        for member in members {
            if let Err(e) = fs::remove_dir_all(member) {
                tracing::warn!("Archive written but {} was not removed: {}", member.display(), e);
            }
        }

        Ok(archive_path)
    }
}
