//! Plasma Store
//!
//! Owns every object record and applies the object state machine. The store
//! is single-threaded: it lives on the runner's main service and every method
//! runs there, serialized.
//!
//! # Architecture
//!
//! ```text
//! PlasmaStore
//!   ├─→ objects: ObjectId → ObjectRecord { state, ref_count, allocation }
//!   ├─→ Allocator        (admission, counters)
//!   ├─→ CapacityMonitor  (gates fallback allocation)
//!   └─→ StoreCallbacks
//!         ├─→ Spiller                 (reclaim under pressure)
//!         ├─→ CapacityObserver        (store full)
//!         └─→ ObjectDirectoryNotifier (seal / delete)
//! ```
//!
//! ## Admission
//!
//! `create_object` asks the allocator first. When it is denied and spillable
//! objects exist in the primary region, exactly one reclaim cycle runs
//! (largest victims first, oldest on ties) and the allocation is retried once. If that still fails
//! the capacity observer is signalled and creation fails with `OutOfMemory`.

pub mod callbacks;
pub mod mock;
pub mod record;

pub use callbacks::{
    CapacityObserver, FnDirectoryNotifier, ObjectDirectoryNotifier, Spiller, StoreCallbacks,
};
pub use record::ObjectRecord;

use crate::allocator::{Allocation, Allocator};
use crate::config::ReclaimPolicy;
use crate::error::{Error, Result};
use crate::metrics;
use crate::monitor::CapacityMonitor;
use crate::object::{ObjectId, ObjectInfo, ObjectLocation, ObjectState};
use bytes::Bytes;
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Log an invariant violation and terminate the process
///
/// Continuing with a possibly corrupt allocator risks silent memory corruption.
fn fatal(err: Error) -> ! {
    error!(error = %err, "Fatal plasma store error, aborting");
    std::process::abort()
}

/// The object store state machine
pub struct PlasmaStore {
    objects: HashMap<ObjectId, ObjectRecord>,
    allocator: Allocator,
    monitor: CapacityMonitor,
    callbacks: StoreCallbacks,
    reclaim_policy: ReclaimPolicy,
    next_seq: u64,
}

impl PlasmaStore {
    pub fn new(
        allocator: Allocator,
        monitor: CapacityMonitor,
        callbacks: StoreCallbacks,
        reclaim_policy: ReclaimPolicy,
    ) -> Self {
        info!(
            system_memory = allocator.system_memory(),
            ?reclaim_policy,
            "Plasma store ready"
        );
        Self {
            objects: HashMap::new(),
            allocator,
            monitor,
            callbacks,
            reclaim_policy,
            next_seq: 0,
        }
    }

    /// Create an unsealed object of `data_size` bytes plus `metadata`
    pub fn create_object(
        &mut self,
        object_id: ObjectId,
        data_size: u64,
        metadata: Bytes,
    ) -> Result<()> {
        if self.objects.contains_key(&object_id) {
            return Err(Error::ObjectExists(object_id));
        }

        let info = ObjectInfo::new(object_id, data_size, metadata);
        let Some(size) = info.checked_total_size() else {
            warn!(object_id = %object_id, data_size, "Object size overflows");
            return Err(Error::OutOfMemory { requested: u64::MAX });
        };

        let allocation = match self.allocate(size) {
            Some(allocation) => allocation,
            None => {
                let victims = self.select_victims(size);
                if victims.is_empty() {
                    return Err(self.reject(object_id, size));
                }
                self.reclaim(&victims);
                match self.allocate(size) {
                    Some(allocation) => allocation,
                    None => return Err(self.reject(object_id, size)),
                }
            }
        };

        let location = allocation.kind();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.objects
            .insert(object_id, ObjectRecord::new(info, allocation, seq));

        metrics::OBJECTS_CREATED.inc();
        self.publish_object_count();
        debug!(object_id = %object_id, size, ?location, "Created object");
        Ok(())
    }

    /// Mark an object complete and announce it to the directory
    pub fn seal_object(&mut self, object_id: &ObjectId) -> Result<()> {
        let record = self
            .objects
            .get_mut(object_id)
            .ok_or(Error::UnknownObject(*object_id))?;

        if record.state != ObjectState::Created {
            return Err(Error::AlreadySealed(*object_id));
        }

        record.state = ObjectState::Sealed;
        record.announced = true;
        self.callbacks.directory.on_object_added(&record.info);

        debug!(
            object_id = %object_id,
            spillable = record.is_spillable(),
            "Sealed object"
        );
        Ok(())
    }

    /// Add a client reference, returning the new count
    pub fn retain_object(&mut self, object_id: &ObjectId) -> Result<u32> {
        let record = self
            .objects
            .get_mut(object_id)
            .ok_or(Error::UnknownObject(*object_id))?;

        if !record.in_memory() {
            return Err(Error::NotInMemory(*object_id));
        }

        record.ref_count += 1;
        debug!(object_id = %object_id, ref_count = record.ref_count, "Retained object");
        Ok(record.ref_count)
    }

    /// Drop a client reference, returning the new count
    ///
    /// Reaching zero on a sealed object makes it spillable; memory is not
    /// freed until it is reclaimed or deleted.
    pub fn release_object(&mut self, object_id: &ObjectId) -> Result<u32> {
        let record = self
            .objects
            .get_mut(object_id)
            .ok_or(Error::UnknownObject(*object_id))?;

        if record.ref_count == 0 {
            return Err(Error::NotReferenced(*object_id));
        }

        record.ref_count -= 1;
        debug!(
            object_id = %object_id,
            ref_count = record.ref_count,
            spillable = record.is_spillable(),
            "Released object"
        );
        Ok(record.ref_count)
    }

    /// Delete an unreferenced object, freeing its memory if still held
    pub fn delete_object(&mut self, object_id: &ObjectId) -> Result<()> {
        let record = self
            .objects
            .get(object_id)
            .ok_or(Error::UnknownObject(*object_id))?;

        if record.ref_count > 0 {
            return Err(Error::ObjectInUse(*object_id));
        }

        let Some(mut record) = self.objects.remove(object_id) else {
            return Err(Error::UnknownObject(*object_id));
        };

        if let Some(allocation) = record.allocation.take() {
            self.free(allocation);
        }
        record.state = ObjectState::Deleted;

        if record.announced {
            self.callbacks.directory.on_object_deleted(object_id);
        }

        self.publish_object_count();
        debug!(
            object_id = %object_id,
            size = record.size(),
            state = ?record.state,
            "Deleted object"
        );
        Ok(())
    }

    /// Sealed and unreferenced; false for unknown objects
    pub fn is_object_spillable(&self, object_id: &ObjectId) -> bool {
        self.objects
            .get(object_id)
            .map(|r| r.is_spillable())
            .unwrap_or(false)
    }

    pub fn object_state(&self, object_id: &ObjectId) -> Option<ObjectState> {
        self.objects.get(object_id).map(|r| r.state)
    }

    pub fn object_location(&self, object_id: &ObjectId) -> Option<ObjectLocation> {
        self.objects.get(object_id).map(|r| r.location())
    }

    pub fn ref_count(&self, object_id: &ObjectId) -> Option<u32> {
        self.objects.get(object_id).map(|r| r.ref_count)
    }

    pub fn contains(&self, object_id: &ObjectId) -> bool {
        self.objects.contains_key(object_id)
    }

    /// Number of object records, spilled ones included
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Primary bytes that a reclaim cycle could free right now
    pub fn spillable_bytes(&self) -> u64 {
        self.objects
            .values()
            .filter(|r| r.is_spillable() && r.location() == ObjectLocation::Primary)
            .map(|r| r.size())
            .sum()
    }

    /// Primary memory not consumed by objects
    pub fn available_memory(&self) -> u64 {
        self.allocator.available_memory()
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Resample the capacity monitor
    pub fn refresh_capacity(&mut self) -> bool {
        self.monitor.refresh()
    }

    pub fn over_capacity(&self) -> bool {
        self.monitor.over_capacity()
    }

    fn allocate(&mut self, size: u64) -> Option<Allocation> {
        let fallback_allowed = !self.monitor.over_capacity();
        self.allocator.try_allocate(size, fallback_allowed)
    }

    fn free(&mut self, allocation: Allocation) {
        if let Err(e) = self.allocator.free(allocation) {
            fatal(e);
        }
    }

    /// Pick spillable, primary-resident objects until the shortfall is covered
    ///
    /// Largest first; ties go to the oldest object. Fallback-resident objects
    /// are never picked: spilling them frees no primary memory.
    fn select_victims(&self, size: u64) -> Vec<ObjectId> {
        let mut candidates: Vec<&ObjectRecord> = self
            .objects
            .values()
            .filter(|r| r.is_spillable() && r.location() == ObjectLocation::Primary)
            .collect();
        candidates.sort_by_key(|r| (Reverse(r.size()), r.create_seq));

        // Fragmentation can deny a request that fits the free bytes, so always
        // take at least one victim.
        let needed = size
            .saturating_sub(self.allocator.primary_free_bytes())
            .max(1);

        let mut freed = 0;
        let mut victims = Vec::new();
        for record in candidates {
            if freed >= needed {
                break;
            }
            freed += record.size();
            victims.push(record.info.object_id);
        }
        victims
    }

    /// Run one reclaim cycle over `victims`
    fn reclaim(&mut self, victims: &[ObjectId]) {
        metrics::SPILL_CYCLES.inc();

        match self.reclaim_policy {
            ReclaimPolicy::Spill => {
                warn!(count = victims.len(), "Requesting spill of objects");
                if !self.callbacks.spiller.spill_objects(victims) {
                    warn!(count = victims.len(), "Spill request declined");
                    return;
                }

                for object_id in victims {
                    let Some(record) = self.objects.get_mut(object_id) else {
                        continue;
                    };
                    if let Some(allocation) = record.allocation.take() {
                        record.state = ObjectState::Spilled;
                        if let Err(e) = self.allocator.free(allocation) {
                            fatal(e);
                        }
                        debug!(object_id = %object_id, "Spilled object");
                    }
                }
            }
            ReclaimPolicy::Evict => {
                warn!(count = victims.len(), "Evicting objects");
                for object_id in victims {
                    let Some(mut record) = self.objects.remove(object_id) else {
                        continue;
                    };
                    if let Some(allocation) = record.allocation.take() {
                        self.free(allocation);
                    }
                    record.state = ObjectState::Evicted;
                    if record.announced {
                        self.callbacks.directory.on_object_deleted(object_id);
                    }
                    debug!(object_id = %object_id, state = ?record.state, "Evicted object");
                }
            }
        }

        self.publish_object_count();
    }

    fn reject(&self, object_id: ObjectId, size: u64) -> Error {
        metrics::STORE_FULL_EVENTS.inc();
        warn!(
            object_id = %object_id,
            size,
            available = self.allocator.available_memory(),
            "Object store full"
        );
        self.callbacks.capacity_observer.on_object_store_full();
        Error::OutOfMemory { requested: size }
    }

    fn publish_object_count(&self) {
        metrics::LIVE_OBJECTS.set(self.objects.len() as i64);
    }
}
