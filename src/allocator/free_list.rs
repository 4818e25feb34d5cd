//! Free-range management for the primary region

use std::collections::BTreeMap;

/// First-fit free list over a contiguous address range
///
/// Free ranges are keyed by offset so neighbours can be coalesced on free.
#[derive(Debug)]
pub struct FreeList {
    /// Total addressable bytes
    capacity: u64,
    /// Free ranges (offset → length)
    free: BTreeMap<u64, u64>,
}

impl FreeList {
    /// Create a free list with the whole range available
    pub fn new(capacity: u64) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self { capacity, free }
    }

    /// Carve `size` bytes out of the lowest free range that fits
    ///
    /// Returns the offset of the range, `None` if nothing fits.
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return Some(0);
        }

        let (offset, len) = self
            .free
            .iter()
            .find(|(_, &len)| len >= size)
            .map(|(&offset, &len)| (offset, len))?;

        self.free.remove(&offset);
        if len > size {
            self.free.insert(offset + size, len - size);
        }
        Some(offset)
    }

    /// Return a range, merging it with adjacent free ranges
    pub fn free(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }

        let mut start = offset;
        let mut len = size;

        if let Some((&prev_offset, &prev_len)) = self.free.range(..offset).next_back() {
            if prev_offset + prev_len == offset {
                self.free.remove(&prev_offset);
                start = prev_offset;
                len += prev_len;
            }
        }

        if let Some(next_len) = self.free.remove(&(offset + size)) {
            len += next_len;
        }

        self.free.insert(start, len);
    }

    /// Total free bytes
    pub fn free_bytes(&self) -> u64 {
        self.free.values().sum()
    }

    /// Length of the largest free range
    pub fn largest_free(&self) -> u64 {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// Number of disjoint free ranges
    pub fn fragments(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_allocation() {
        let mut list = FreeList::new(1000);

        assert_eq!(list.allocate(100), Some(0));
        assert_eq!(list.allocate(200), Some(100));
        assert_eq!(list.allocate(700), Some(300));
        assert_eq!(list.allocate(1), None);
        assert_eq!(list.free_bytes(), 0);
    }

    #[test]
    fn test_free_coalesces_neighbours() {
        let mut list = FreeList::new(300);

        let a = list.allocate(100).unwrap();
        let b = list.allocate(100).unwrap();
        let c = list.allocate(100).unwrap();

        list.free(a, 100);
        list.free(c, 100);
        assert_eq!(list.fragments(), 2);
        assert_eq!(list.largest_free(), 100);

        // Freeing the middle joins all three
        list.free(b, 100);
        assert_eq!(list.fragments(), 1);
        assert_eq!(list.largest_free(), 300);
    }

    #[test]
    fn test_fragmentation_denies_large_request() {
        let mut list = FreeList::new(300);

        let a = list.allocate(100).unwrap();
        let _b = list.allocate(100).unwrap();
        let c = list.allocate(100).unwrap();
        list.free(a, 100);
        list.free(c, 100);

        assert_eq!(list.free_bytes(), 200);
        assert_eq!(list.allocate(200), None);
        assert_eq!(list.allocate(100), Some(0));
    }

    #[test]
    fn test_zero_sized_requests() {
        let mut list = FreeList::new(0);
        assert_eq!(list.allocate(0), Some(0));
        list.free(0, 0);
        assert_eq!(list.free_bytes(), 0);
        assert_eq!(list.capacity(), 0);
    }
}
