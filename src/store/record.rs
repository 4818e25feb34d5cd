//! Object records owned by the store

use crate::allocator::{Allocation, AllocationKind};
use crate::object::{ObjectInfo, ObjectLocation, ObjectState};

/// A stored object and its bookkeeping
#[derive(Debug)]
pub struct ObjectRecord {
    pub info: ObjectInfo,
    pub state: ObjectState,
    /// References held by attached clients
    pub ref_count: u32,
    /// Creation order, used to break victim-selection ties
    pub create_seq: u64,
    /// Backing memory, `None` once spilled
    pub(crate) allocation: Option<Allocation>,
    /// Whether the directory has been told about this object
    pub(crate) announced: bool,
}

impl ObjectRecord {
    pub(crate) fn new(info: ObjectInfo, allocation: Allocation, create_seq: u64) -> Self {
        Self {
            info,
            state: ObjectState::Created,
            ref_count: 0,
            create_seq,
            allocation: Some(allocation),
            announced: false,
        }
    }

    /// Bytes charged against the budget while in memory
    pub fn size(&self) -> u64 {
        self.info.total_size()
    }

    pub fn location(&self) -> ObjectLocation {
        match self.allocation.as_ref().map(|a| a.kind()) {
            Some(AllocationKind::Primary) => ObjectLocation::Primary,
            Some(AllocationKind::Fallback) => ObjectLocation::Fallback,
            None => ObjectLocation::Spilled,
        }
    }

    /// Sealed and unreferenced
    pub fn is_spillable(&self) -> bool {
        self.state == ObjectState::Sealed && self.ref_count == 0
    }

    pub fn in_memory(&self) -> bool {
        self.allocation.is_some()
    }
}
