//! Overlay Importer / Diff, per spec.md §4.5: bring a host directory tree
//! into the inode filesystem, then later compute and export what changed.

pub mod diff;
pub mod importer;

pub use diff::{change_set, export_patch, Change, ChangeKind};
pub use importer::{initialize, reset, ImportConfig, ImportStats};
