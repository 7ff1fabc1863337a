//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for L1 eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Stale queue slots tolerated before a compaction pass.
const COMPACTION_SLACK: usize = 32;

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Keys are stored in a VecDeque where:
/// - Front = Most recently used
/// - Back = Least recently used
///
/// Each touch stamps the key with a fresh tick and pushes a new slot; older
/// slots for the same key become stale and are skipped on eviction. The queue
/// is compacted once stale slots outnumber live ones, which keeps touch,
/// remove and evict at amortized O(1).
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Access slots, possibly including stale ones
    order: VecDeque<(u64, Arc<str>)>,
    /// Latest tick per live key
    stamps: HashMap<Arc<str>, u64>,
    /// Monotonic access clock
    clock: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &str) {
        self.clock += 1;
        let tick = self.clock;

        let shared: Arc<str> = match self.stamps.get_key_value(key) {
            Some((existing, _)) => Arc::clone(existing),
            None => Arc::from(key),
        };
        self.stamps.insert(Arc::clone(&shared), tick);
        self.order.push_front((tick, shared));

        self.compact_if_needed();
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        if self.stamps.remove(key).is_some() {
            self.compact_if_needed();
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        while let Some((tick, key)) = self.order.pop_back() {
            if self.stamps.get(&key) == Some(&tick) {
                self.stamps.remove(&key);
                return Some(key.to_string());
            }
        }
        None
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&str> {
        self.order
            .iter()
            .rev()
            .find(|(tick, key)| self.stamps.get(key) == Some(tick))
            .map(|(_, key)| key.as_ref())
    }

    // == Clear ==
    /// Forgets every tracked key.
    pub fn clear(&mut self) {
        self.order.clear();
        self.stamps.clear();
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    // == Contains ==
    /// Checks if a key is being tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.stamps.contains_key(key)
    }

    fn compact_if_needed(&mut self) {
        if self.order.len() > 2 * self.stamps.len() + COMPACTION_SLACK {
            let stamps = &self.stamps;
            self.order
                .retain(|(tick, key)| stamps.get(key) == Some(tick));
        }
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.order.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_new() {
        let lru = LruTracker::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_lru_touch_new_key() {
        let mut lru = LruTracker::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.peek_oldest(), Some("key1"));
    }

    #[test]
    fn test_lru_touch_existing_key() {
        let mut lru = LruTracker::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");

        // Touch key1 again - should move to front
        lru.touch("key1");

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.peek_oldest(), Some("key2"));
    }

    #[test]
    fn test_lru_evict_oldest() {
        let mut lru = LruTracker::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");

        assert_eq!(lru.evict_oldest(), Some("key1".to_string()));
        assert_eq!(lru.len(), 2);

        assert_eq!(lru.evict_oldest(), Some("key2".to_string()));
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_lru_evict_empty() {
        let mut lru = LruTracker::new();
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_remove() {
        let mut lru = LruTracker::new();

        lru.touch("key1");
        lru.touch("key2");
        lru.touch("key3");

        lru.remove("key2");

        assert_eq!(lru.len(), 2);
        assert!(!lru.contains("key2"));
        assert!(lru.contains("key1"));
        assert!(lru.contains("key3"));

        // The stale slot for key2 must not be returned
        assert_eq!(lru.evict_oldest(), Some("key1".to_string()));
        assert_eq!(lru.evict_oldest(), Some("key3".to_string()));
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_order_after_multiple_touches() {
        let mut lru = LruTracker::new();

        lru.touch("a");
        lru.touch("b");
        lru.touch("c");

        // Recency after these: b (newest), c, a (oldest)
        lru.touch("a");
        lru.touch("c");
        lru.touch("b");

        assert_eq!(lru.evict_oldest(), Some("a".to_string()));
        assert_eq!(lru.evict_oldest(), Some("c".to_string()));
        assert_eq!(lru.evict_oldest(), Some("b".to_string()));
    }

    #[test]
    fn test_lru_touch_same_key_multiple_times() {
        let mut lru = LruTracker::new();

        lru.touch("key1");
        lru.touch("key1");
        lru.touch("key1");

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict_oldest(), Some("key1".to_string()));
        assert!(lru.is_empty());
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_queue_is_compacted_under_hot_keys() {
        let mut lru = LruTracker::new();

        lru.touch("cold");
        for _ in 0..10_000 {
            lru.touch("hot");
        }

        assert_eq!(lru.len(), 2);
        assert!(lru.queue_len() <= 2 * lru.len() + COMPACTION_SLACK + 1);
        assert_eq!(lru.peek_oldest(), Some("cold"));
    }

    #[test]
    fn test_lru_clear() {
        let mut lru = LruTracker::new();
        lru.touch("a");
        lru.touch("b");

        lru.clear();

        assert!(lru.is_empty());
        assert_eq!(lru.evict_oldest(), None);
    }
}
