//! # Storage
//!
//! Disk persistence for snapshots.

pub mod redb_journal;

pub use redb_journal::{RedbJournal, SaveMode};
