//! Change detection for individual files.
//!
//! A fingerprint is the string recorded for a file in the record store:
//! either a SHA-256 digest of its contents or its modification timestamp.
//! Comparing a fresh fingerprint with the recorded one decides whether a
//! differential backup has to copy the file.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use std::time::SystemTime;

/// How a file is compared against its recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// SHA-256 of the file contents
    ContentHash,
    /// Last-modified timestamp
    ModificationTime,
}

impl CompareMode {
    /// Pick the mode from the `use-content-hash` configuration flag.
    pub fn from_use_content_hash(use_content_hash: bool) -> Self {
        if use_content_hash {
            CompareMode::ContentHash
        } else {
            CompareMode::ModificationTime
        }
    }

    /// Compute the fingerprint of the file at `path` for this mode.
    ///
    /// Symbolic links are followed.
    pub fn fingerprint(self, path: &Path) -> io::Result<String> {
        match self {
            CompareMode::ContentHash => hash_file(path),
            CompareMode::ModificationTime => modified_stamp(path),
        }
    }

    /// Whether `value` has the shape of a fingerprint produced by this mode.
    ///
    /// Hash values are 32, 40 or 64 hex digits (older stores may hold MD5 or
    /// SHA-1 digests). Timestamps are decimal seconds with an optional
    /// fractional part.
    pub fn accepts(self, value: &str) -> bool {
        match self {
            CompareMode::ContentHash => {
                matches!(value.len(), 32 | 40 | 64) && value.bytes().all(|b| b.is_ascii_hexdigit())
            }
            CompareMode::ModificationTime => is_timestamp(value),
        }
    }

    /// Infer the mode a stored value was produced with, if any.
    pub fn detect(value: &str) -> Option<Self> {
        [CompareMode::ContentHash, CompareMode::ModificationTime]
            .into_iter()
            .find(|mode| mode.accepts(value))
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareMode::ContentHash => f.write_str("content-hash"),
            CompareMode::ModificationTime => f.write_str("modification-time"),
        }
    }
}

/// Outcome of comparing a file with its recorded fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCheck {
    /// True when no fingerprint was recorded or the recorded one differs
    pub changed: bool,

    /// Freshly computed fingerprint
    pub fingerprint: String,
}

/// Compare the file at `path` with its recorded fingerprint.
///
/// # Arguments
/// * `path` - File to inspect
/// * `recorded` - Fingerprint stored for this path, if any
/// * `mode` - Comparison mode
///
/// # Returns
/// * `Ok(ChangeCheck)` - Whether the file differs, plus the new fingerprint
/// * `Err(io::Error)` - If the file cannot be read or has vanished
pub fn check(path: &Path, recorded: Option<&str>, mode: CompareMode) -> io::Result<ChangeCheck> {
    let fingerprint = mode.fingerprint(path)?;
    let changed = recorded != Some(fingerprint.as_str());

    Ok(ChangeCheck {
        changed,
        fingerprint,
    })
}

/// SHA-256 of a file's contents as lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();

    io::copy(&mut reader, &mut hasher)?;

    Ok(hex::encode(hasher.finalize()))
}

/// Last-modified time as `<seconds>.<nanoseconds>` since the Unix epoch.
pub fn modified_stamp(path: &Path) -> io::Result<String> {
    let modified = fs::metadata(path)?.modified()?;
    let since_epoch = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    Ok(format!(
        "{}.{:09}",
        since_epoch.as_secs(),
        since_epoch.subsec_nanos()
    ))
}

fn is_timestamp(value: &str) -> bool {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (value, None),
    };

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    digits(whole) && fraction.map_or(true, digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_hash_known_content() -> io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"hello world")?;
        temp_file.flush()?;

        let digest = hash_file(temp_file.path())?;
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );

        Ok(())
    }

    #[test]
    fn test_check_without_record_is_changed() -> io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"data")?;
        temp_file.flush()?;

        let result = check(temp_file.path(), None, CompareMode::ContentHash)?;
        assert!(result.changed);
        assert_eq!(result.fingerprint.len(), 64);

        Ok(())
    }

    #[test]
    fn test_check_matching_record_is_unchanged() -> io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"data")?;
        temp_file.flush()?;

        for mode in [CompareMode::ContentHash, CompareMode::ModificationTime] {
            let recorded = mode.fingerprint(temp_file.path())?;
            let result = check(temp_file.path(), Some(&recorded), mode)?;
            assert!(!result.changed, "{} should report unchanged", mode);
        }

        Ok(())
    }

    #[test]
    fn test_content_change_detected() -> io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"before")?;
        temp_file.flush()?;
        let recorded = hash_file(temp_file.path())?;

        temp_file.write_all(b" and after")?;
        temp_file.flush()?;

        let result = check(temp_file.path(), Some(&recorded), CompareMode::ContentHash)?;
        assert!(result.changed);

        Ok(())
    }

    #[test]
    fn test_mtime_change_detected() -> io::Result<()> {
        let temp_file = NamedTempFile::new()?;
        let recorded = modified_stamp(temp_file.path())?;

        let later = SystemTime::now() + Duration::from_secs(3600);
        temp_file
            .as_file()
            .set_times(fs::FileTimes::new().set_modified(later))?;

        let result = check(temp_file.path(), Some(&recorded), CompareMode::ModificationTime)?;
        assert!(result.changed);
        assert!(CompareMode::ModificationTime.accepts(&result.fingerprint));

        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = check(
            Path::new("/definitely/not/here.txt"),
            None,
            CompareMode::ContentHash,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_value_shapes() {
        let sha256 = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let md5 = "5eb63bbbe01eeed093cb22bb8f5acdc3";

        assert_eq!(CompareMode::detect(sha256), Some(CompareMode::ContentHash));
        assert_eq!(CompareMode::detect(md5), Some(CompareMode::ContentHash));
        assert_eq!(
            CompareMode::detect("1697040000.123456789"),
            Some(CompareMode::ModificationTime)
        );
        assert_eq!(
            CompareMode::detect("1697040000"),
            Some(CompareMode::ModificationTime)
        );
        assert_eq!(CompareMode::detect("not a fingerprint"), None);
        assert_eq!(CompareMode::detect("12."), None);
        assert!(!CompareMode::ModificationTime.accepts(sha256));
    }
}
