//! Name-based exclusion of files and directories.

use crate::{BackupError, Result};
use regex::Regex;

/// Compiled set of ignore patterns.
///
/// Each pattern is a regular expression anchored at the start of the bare
/// item name (not its path), so `\.git` matches `.git` and `.gitignore` but
/// not `my.git`.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    patterns: Vec<Regex>,
}

impl IgnoreFilter {
    /// Compile `patterns`. An invalid expression is a configuration error.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
                    BackupError::InvalidPattern {
                        pattern: pattern.to_string(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// True if any pattern matches the start of `name`.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(name))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
