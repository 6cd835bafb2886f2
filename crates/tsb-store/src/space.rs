//! Capacity and available-space accounting.
//!
//! The store never asks the filesystem how much room is left while writing.
//! Capacity is derived once at construction; `available` is then a running
//! counter debited by writes, credited by deletes and reset by flushes.

pub const BYTES_IN_MIB: u64 = 1024 * 1024;

/// `min(max_capacity_bytes, fs_capacity * (100 - min_free_percent) / 100)`.
///
/// `min_free_percent` must already be validated to be at most 100.
pub fn effective_capacity(fs_capacity: u64, min_free_percent: u32, max_capacity_bytes: u64) -> u64 {
    let usable_percent = u128::from(100u32.saturating_sub(min_free_percent));
    let usable = u128::from(fs_capacity) * usable_percent / 100;
    // usable <= fs_capacity, so the narrowing cannot truncate.
    max_capacity_bytes.min(usable as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceAccountant {
    capacity: u64,
    available: u64,
}

impl SpaceAccountant {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            available: capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn available(&self) -> u64 {
        self.available
    }

    #[inline]
    pub fn fits(&self, size: u64) -> bool {
        size <= self.available
    }

    /// Account for a segment that was written. Callers check [`fits`](Self::fits) first.
    pub fn debit(&mut self, size: u64) {
        self.available = self.available.saturating_sub(size);
    }

    /// Account for a segment that was deleted. Never exceeds the capacity,
    /// even for a file that was left behind by a failed write.
    pub fn credit(&mut self, size: u64) {
        self.available = self.available.saturating_add(size).min(self.capacity);
    }

    /// A flush makes the whole capacity available again, whether or not the
    /// old generation has been physically removed yet.
    pub fn reset(&mut self) {
        self.available = self.capacity;
    }
}
