//! # Formats
//!
//! Snapshot structure and its encodings. Pure transformations, no file I/O.

pub mod persistence;
pub mod snapshot;

pub use persistence::{
    MAX_SNAPSHOT_PAYLOAD_SIZE, PersistenceHeader, snapshot_from_bytes, snapshot_to_bytes,
};
pub use snapshot::Snapshot;
