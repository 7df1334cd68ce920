//! # Persistence Format
//!
//! Binary serialization for Memex snapshots.
//!
//! Format: Header (5 bytes) + postcard-serialized [`Snapshot`].
//! - 4 bytes: Magic ("MEMX")
//! - 1 byte: Version
//!
//! ## Validation
//!
//! Size limits and the header are checked before the payload is parsed:
//! - Maximum payload size limit (`MAX_SNAPSHOT_PAYLOAD_SIZE`)
//! - Header validation before payload parsing
//! - Corrupted payloads are errors, never panics

use super::Snapshot;
use crate::{MemexError, primitives};

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum accepted size of an encoded snapshot.
///
/// Checked BEFORE deserialization so a corrupted length prefix cannot drive
/// a huge allocation.
pub const MAX_SNAPSHOT_PAYLOAD_SIZE: usize = 500 * 1024 * 1024; // 500 MB

const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header preceding every encoded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), MemexError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(MemexError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(MemexError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MemexError> {
        let Some(head) = bytes.get(..HEADER_LEN) else {
            return Err(MemexError::DeserializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head[0..4]);
        Ok(Self {
            magic,
            version: head[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Encode a snapshot (header + payload).
pub fn snapshot_to_bytes(snapshot: &Snapshot) -> Result<Vec<u8>, MemexError> {
    let payload = postcard::to_stdvec(snapshot)
        .map_err(|e| MemexError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Decode a snapshot.
///
/// Checks, in order, before touching the payload:
/// 1. Minimum size (a full header)
/// 2. Maximum size
/// 3. Magic bytes and version
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<Snapshot, MemexError> {
    if bytes.len() < HEADER_LEN {
        return Err(MemexError::DeserializationError(format!(
            "Data too short: minimum {} bytes required",
            HEADER_LEN
        )));
    }
    if bytes.len() > MAX_SNAPSHOT_PAYLOAD_SIZE {
        return Err(MemexError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_PAYLOAD_SIZE
        )));
    }

    PersistenceHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        MemexError::DeserializationError(format!("Failed to decode snapshot: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================
