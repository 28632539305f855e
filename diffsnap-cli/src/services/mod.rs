//! Collaborators the backup engine hands its results to.

pub mod archive;
pub mod prompt;
pub mod stats;
