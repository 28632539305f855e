//! Filesystem side of a backup: exclusion, copying, mirroring.

pub mod ignore;
pub mod metadata;
pub mod mirror;
