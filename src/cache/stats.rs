//! Memory Statistics Module
//!
//! Tracks L1 performance metrics including hits, misses, and evictions.

use serde::Serialize;

// == Memory Stats ==
/// Tracks L1 performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    /// Number of successful lookups
    pub hits: u64,
    /// Number of failed lookups (absent or expired)
    pub misses: u64,
    /// Number of entries evicted due to the LRU policy
    pub evictions: u64,
    /// Number of entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Number of values refused because they exceed the byte budget
    pub rejected: u64,
    /// Current number of entries
    pub total_entries: usize,
    /// Current sum of entry sizes in bytes
    pub total_bytes: usize,
    /// Entry capacity
    pub max_entries: usize,
    /// Byte budget, if any
    pub max_bytes: Option<usize>,
}

impl MemoryStats {
    // == Constructor ==
    /// Creates stats with all counters at zero for the given bounds.
    pub fn new(max_entries: usize, max_bytes: Option<usize>) -> Self {
        Self {
            max_entries,
            max_bytes,
            ..Self::default()
        }
    }

    // == Hit Rate ==
    /// Calculates the hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    /// Counts `count` entries dropped by TTL.
    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn record_rejection(&mut self) {
        self.rejected += 1;
    }

    // == Update Occupancy ==
    /// Updates the occupancy gauges.
    pub fn set_occupancy(&mut self, entries: usize, bytes: usize) {
        self.total_entries = entries;
        self.total_bytes = bytes;
    }
}
