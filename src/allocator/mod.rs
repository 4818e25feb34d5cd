//! Plasma Allocator
//!
//! Single source of truth for memory admission. Tracks a fixed primary budget
//! mapped from a file in the plasma directory, plus an optional fallback
//! region where every allocation gets its own mapped file.
//!
//! # Architecture
//!
//! ```text
//! Allocator
//!   ├─→ Primary region (plasma_directory/plasma_<uuid>.bin, system_memory bytes)
//!   │     └─→ FreeList: {0 → 400, 900 → 100}
//!   ├─→ Fallback regions (fallback_directory/fallback_<uuid>_<id>.bin)
//!   └─→ AllocatorStats (atomics, readable from any thread)
//! ```
//!
//! The allocator itself is owned by the store's main service and is never
//! shared; only [`AllocatorStats`] crosses threads.

pub mod free_list;
pub mod region;

use crate::error::{Error, Result};
use crate::metrics;
use free_list::FreeList;
use region::MappedRegion;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Huge page size used to round the primary reservation
pub const HUGE_PAGE_SIZE: u64 = 2 * 1024 * 1024;

/// Which region served an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    Primary,
    Fallback,
}

/// A live allocation handed out by [`Allocator::try_allocate`]
///
/// Not `Clone`: freeing consumes the handle.
#[derive(Debug, PartialEq, Eq)]
pub struct Allocation {
    id: u64,
    offset: u64,
    size: u64,
    kind: AllocationKind,
}

impl Allocation {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn kind(&self) -> AllocationKind {
        self.kind
    }

    pub fn is_fallback(&self) -> bool {
        self.kind == AllocationKind::Fallback
    }
}

/// Allocator counters shared with the runner
///
/// Written only from the store's main service, read from any thread.
#[derive(Debug, Default)]
pub struct AllocatorStats {
    consumed_bytes: AtomicU64,
    cumulative_created_objects: AtomicU64,
    cumulative_created_bytes: AtomicU64,
    fallback_allocated_bytes: AtomicU64,
}

impl AllocatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumed_bytes(&self) -> u64 {
        self.consumed_bytes.load(Ordering::Acquire)
    }

    pub fn cumulative_created_objects(&self) -> u64 {
        self.cumulative_created_objects.load(Ordering::Acquire)
    }

    pub fn cumulative_created_bytes(&self) -> u64 {
        self.cumulative_created_bytes.load(Ordering::Acquire)
    }

    pub fn fallback_allocated_bytes(&self) -> u64 {
        self.fallback_allocated_bytes.load(Ordering::Acquire)
    }

    fn record_allocation(&self, size: u64, kind: AllocationKind) {
        // Cumulative counters first so a concurrent reader never sees
        // consumed above cumulative.
        self.cumulative_created_objects.fetch_add(1, Ordering::AcqRel);
        self.cumulative_created_bytes.fetch_add(size, Ordering::AcqRel);
        if kind == AllocationKind::Fallback {
            self.fallback_allocated_bytes.fetch_add(size, Ordering::AcqRel);
        }
        self.consumed_bytes.fetch_add(size, Ordering::AcqRel);
        self.publish();
    }

    fn record_free(&self, size: u64, kind: AllocationKind) -> Result<()> {
        let consumed = self.consumed_bytes();
        let fallback = self.fallback_allocated_bytes();
        if consumed < size || (kind == AllocationKind::Fallback && fallback < size) {
            return Err(Error::AllocatorCorruption(format!(
                "Counter underflow freeing {} bytes (consumed={}, fallback={})",
                size, consumed, fallback
            )));
        }

        self.consumed_bytes.fetch_sub(size, Ordering::AcqRel);
        if kind == AllocationKind::Fallback {
            self.fallback_allocated_bytes.fetch_sub(size, Ordering::AcqRel);
        }
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        metrics::CONSUMED_BYTES.set(self.consumed_bytes() as i64);
        metrics::FALLBACK_ALLOCATED_BYTES.set(self.fallback_allocated_bytes() as i64);
    }
}

/// Bookkeeping for a live allocation
struct LiveAllocation {
    size: u64,
    kind: AllocationKind,
}

/// Budgeted allocator over a primary region and optional fallback files
pub struct Allocator {
    system_memory: u64,
    hugepages_enabled: bool,
    plasma_directory: PathBuf,
    fallback_directory: Option<PathBuf>,
    /// Unique per allocator, keeps backing file names disjoint
    instance: uuid::Uuid,
    primary: MappedRegion,
    free_list: FreeList,
    fallback_regions: HashMap<u64, MappedRegion>,
    live: HashMap<u64, LiveAllocation>,
    next_id: u64,
    stats: Arc<AllocatorStats>,
}

impl Allocator {
    /// Reserve the primary region and prepare the fallback directory
    ///
    /// # Arguments
    /// * `system_memory` - Primary budget in bytes (must be > 0)
    /// * `hugepages_enabled` - Round the primary mapping to huge pages
    /// * `plasma_directory` - Directory holding the primary backing file
    /// * `fallback_directory` - Directory for fallback files, `None` disables fallback
    /// * `stats` - Counters to publish into
    pub fn new(
        system_memory: u64,
        hugepages_enabled: bool,
        plasma_directory: impl AsRef<Path>,
        fallback_directory: Option<PathBuf>,
        stats: Arc<AllocatorStats>,
    ) -> Result<Self> {
        if system_memory == 0 {
            return Err(Error::ConstructionFailure(
                "system_memory must be greater than zero".to_string(),
            ));
        }

        let plasma_directory = plasma_directory.as_ref().to_path_buf();
        let instance = uuid::Uuid::new_v4();

        let reserved = if hugepages_enabled {
            system_memory.div_ceil(HUGE_PAGE_SIZE) * HUGE_PAGE_SIZE
        } else {
            system_memory
        };

        let primary = MappedRegion::create(
            &plasma_directory,
            &format!("plasma_{}.bin", instance.simple()),
            reserved,
        )?;

        if let Some(dir) = &fallback_directory {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::ConstructionFailure(format!(
                    "Failed to create fallback directory {:?}: {}",
                    dir, e
                ))
            })?;
        }

        info!(
            system_memory,
            reserved,
            hugepages_enabled,
            plasma_directory = ?plasma_directory,
            fallback_directory = ?fallback_directory,
            "Initialized plasma allocator"
        );

        Ok(Self {
            system_memory,
            hugepages_enabled,
            plasma_directory,
            fallback_directory,
            instance,
            primary,
            free_list: FreeList::new(system_memory),
            fallback_regions: HashMap::new(),
            live: HashMap::new(),
            next_id: 0,
            stats,
        })
    }

    /// Allocate `size` bytes, primary region first
    ///
    /// Falls back to a file in the fallback directory when the primary region
    /// cannot fit the request, a fallback directory is configured and
    /// `fallback_allowed` is set. `None` means the request was denied.
    pub fn try_allocate(&mut self, size: u64, fallback_allowed: bool) -> Option<Allocation> {
        if let Some(offset) = self.free_list.allocate(size) {
            return Some(self.admit(offset, size, AllocationKind::Primary));
        }

        if !fallback_allowed {
            debug!(size, "Primary allocation failed, fallback not allowed");
            return None;
        }

        let dir = self.fallback_directory.as_ref()?;
        let id = self.next_id;
        let file_name = format!("fallback_{}_{}.bin", self.instance.simple(), id);

        match MappedRegion::create(dir, &file_name, size) {
            Ok(region) => {
                self.fallback_regions.insert(id, region);
                info!(size, "Served allocation from fallback region");
                Some(self.admit(0, size, AllocationKind::Fallback))
            }
            Err(e) => {
                warn!(size, error = %e, "Fallback allocation failed");
                None
            }
        }
    }

    fn admit(&mut self, offset: u64, size: u64, kind: AllocationKind) -> Allocation {
        let id = self.next_id;
        self.next_id += 1;

        self.live.insert(id, LiveAllocation { size, kind });
        self.stats.record_allocation(size, kind);
        debug!(id, offset, size, ?kind, "Allocated");

        Allocation {
            id,
            offset,
            size,
            kind,
        }
    }

    /// Release an allocation back to its region
    ///
    /// An allocation this allocator does not consider live is corruption; the
    /// counters are left untouched.
    pub fn free(&mut self, allocation: Allocation) -> Result<()> {
        let live = match self.live.get(&allocation.id) {
            Some(live) if live.size == allocation.size && live.kind == allocation.kind => live,
            _ => {
                error!(
                    id = allocation.id,
                    size = allocation.size,
                    "Free of an allocation that is not live"
                );
                return Err(Error::AllocatorCorruption(format!(
                    "Allocation {} ({} bytes) freed twice or not owned by this allocator",
                    allocation.id, allocation.size
                )));
            }
        };

        self.stats.record_free(live.size, live.kind)?;
        self.live.remove(&allocation.id);

        match allocation.kind {
            AllocationKind::Primary => self.free_list.free(allocation.offset, allocation.size),
            AllocationKind::Fallback => {
                self.fallback_regions.remove(&allocation.id);
            }
        }

        debug!(id = allocation.id, size = allocation.size, "Freed");
        Ok(())
    }

    /// Primary bytes not yet consumed, floored at zero
    ///
    /// Fallback capacity is not counted.
    pub fn available_memory(&self) -> u64 {
        self.system_memory
            .saturating_sub(self.stats.consumed_bytes())
    }

    /// Bytes still free in the primary region, fragments included
    pub fn primary_free_bytes(&self) -> u64 {
        self.free_list.free_bytes()
    }

    pub fn system_memory(&self) -> u64 {
        self.system_memory
    }

    pub fn hugepages_enabled(&self) -> bool {
        self.hugepages_enabled
    }

    /// Length of the primary mapping (may exceed the budget with huge pages)
    pub fn reserved_bytes(&self) -> u64 {
        self.primary.len()
    }

    pub fn plasma_directory(&self) -> &Path {
        &self.plasma_directory
    }

    pub fn fallback_directory(&self) -> Option<&Path> {
        self.fallback_directory.as_deref()
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> &Arc<AllocatorStats> {
        &self.stats
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        info!(
            live = self.live.len(),
            fallback_regions = self.fallback_regions.len(),
            "Releasing plasma allocator"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "plasma_alloc_{}_{}_{}",
            tag,
            std::process::id(),
            uuid::Uuid::new_v4()
        ))
    }

    fn allocator(dir: &Path, budget: u64, fallback: bool) -> Result<Allocator> {
        let fallback_dir = fallback.then(|| dir.join("fallback"));
        Allocator::new(
            budget,
            false,
            dir.join("plasma"),
            fallback_dir,
            Arc::new(AllocatorStats::new()),
        )
    }

    #[test]
    fn test_allocator_counters() -> Result<()> {
        let dir = temp_dir("counters");
        let mut alloc = allocator(&dir, 1000, false)?;

        let a = alloc.try_allocate(600, true).expect("fits in primary");
        assert_eq!(a.kind(), AllocationKind::Primary);
        assert_eq!(alloc.stats().consumed_bytes(), 600);
        assert_eq!(alloc.available_memory(), 400);

        assert!(alloc.try_allocate(500, true).is_none());

        alloc.free(a)?;
        let stats = alloc.stats();
        assert_eq!(stats.consumed_bytes(), 0);
        assert_eq!(stats.cumulative_created_bytes(), 600);
        assert_eq!(stats.cumulative_created_objects(), 1);
        assert_eq!(stats.fallback_allocated_bytes(), 0);

        drop(alloc);
        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_fallback_after_primary_exhausted() -> Result<()> {
        let dir = temp_dir("fallback");
        let mut alloc = allocator(&dir, 1000, true)?;

        let a = alloc.try_allocate(800, true).expect("primary");
        let b = alloc.try_allocate(500, true).expect("fallback");
        assert!(b.is_fallback());

        let stats = alloc.stats().clone();
        assert_eq!(stats.consumed_bytes(), 1300);
        assert_eq!(stats.fallback_allocated_bytes(), 500);
        assert!(stats.consumed_bytes() <= alloc.system_memory() + stats.fallback_allocated_bytes());
        assert_eq!(alloc.available_memory(), 0);
        // Fallback bytes never eat into the primary region
        assert_eq!(alloc.primary_free_bytes(), 200);

        alloc.free(b)?;
        assert_eq!(stats.fallback_allocated_bytes(), 0);
        alloc.free(a)?;
        assert_eq!(stats.consumed_bytes(), 0);

        drop(alloc);
        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_fallback_gated() -> Result<()> {
        let dir = temp_dir("gated");
        let mut alloc = allocator(&dir, 100, true)?;
        assert!(alloc.try_allocate(200, false).is_none());
        assert_eq!(alloc.stats().fallback_allocated_bytes(), 0);

        let other = temp_dir("none");
        let mut no_fallback = allocator(&other, 100, false)?;
        assert!(no_fallback.try_allocate(200, true).is_none());

        drop(alloc);
        drop(no_fallback);
        std::fs::remove_dir_all(dir).ok();
        std::fs::remove_dir_all(other).ok();
        Ok(())
    }

    #[test]
    fn test_double_free_is_corruption() -> Result<()> {
        let dir = temp_dir("double_free");
        let mut alloc = allocator(&dir, 1000, false)?;

        let a = alloc.try_allocate(100, false).expect("primary");
        let forged = Allocation {
            id: a.id,
            offset: a.offset,
            size: a.size,
            kind: a.kind,
        };
        alloc.free(a)?;

        let err = alloc.free(forged).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(alloc.stats().consumed_bytes(), 0);
        assert_eq!(alloc.stats().cumulative_created_bytes(), 100);

        drop(alloc);
        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_hugepages_round_reservation() -> Result<()> {
        let dir = temp_dir("hugepages");
        let mut alloc = Allocator::new(
            1000,
            true,
            dir.join("plasma"),
            None,
            Arc::new(AllocatorStats::new()),
        )?;

        assert_eq!(alloc.reserved_bytes(), HUGE_PAGE_SIZE);
        // Budget is unchanged by the larger reservation
        assert!(alloc.try_allocate(1001, false).is_none());
        assert_eq!(alloc.available_memory(), 1000);

        drop(alloc);
        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_zero_budget_rejected() {
        let dir = temp_dir("zero");
        let result = Allocator::new(0, false, &dir, None, Arc::new(AllocatorStats::new()));
        assert!(matches!(result, Err(Error::ConstructionFailure(_))));
        std::fs::remove_dir_all(dir).ok();
    }
}
