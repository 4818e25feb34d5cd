//! Object identifiers and lifecycle types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of an object identifier in bytes
pub const OBJECT_ID_SIZE: usize = 28;

/// Opaque identifier naming one stored object for its entire lifetime
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_SIZE]);

impl ObjectId {
    /// Create an identifier from raw bytes
    pub fn new(bytes: [u8; OBJECT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create an identifier from a binary slice, `None` on length mismatch
    pub fn from_binary(binary: &[u8]) -> Option<Self> {
        let bytes: [u8; OBJECT_ID_SIZE] = binary.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Generate a random identifier
    pub fn from_random() -> Self {
        let mut bytes = [0u8; OBJECT_ID_SIZE];
        bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..OBJECT_ID_SIZE - 16]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_SIZE] {
        &self.0
    }

    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.hex())
    }
}

/// Lifecycle state of an object record
///
/// ```text
/// Created ──seal──> Sealed ──spill──> Spilled ──delete──> Deleted
///                     │
///                     └──evict──> Evicted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectState {
    Created,
    Sealed,
    Spilled,
    Evicted,
    Deleted,
}

impl ObjectState {
    /// Whether no transition leaves this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ObjectState::Evicted | ObjectState::Deleted)
    }
}

/// Where an object's bytes currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectLocation {
    /// Pre-budgeted shared-memory region
    Primary,
    /// Disk-file-backed region used once primary memory is exhausted
    Fallback,
    /// Persisted to external storage, no in-memory backing
    Spilled,
}

/// Information announced to the object directory when an object is sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub object_id: ObjectId,
    pub data_size: u64,
    pub metadata: Bytes,
}

impl ObjectInfo {
    pub fn new(object_id: ObjectId, data_size: u64, metadata: Bytes) -> Self {
        Self {
            object_id,
            data_size,
            metadata,
        }
    }

    /// Bytes charged against the memory budget, `None` if it overflows `u64`
    pub fn checked_total_size(&self) -> Option<u64> {
        self.data_size.checked_add(self.metadata.len() as u64)
    }

    /// Bytes charged against the memory budget
    pub fn total_size(&self) -> u64 {
        self.data_size.saturating_add(self.metadata.len() as u64)
    }
}
