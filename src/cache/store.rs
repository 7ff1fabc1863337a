//! Memory Store Module
//!
//! L1 engine combining HashMap storage with LRU tracking and TTL expiration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{CacheEntry, LruTracker, MemoryStats};
use crate::keys::{belongs_to_identifier, namespace_of};

// == Set Outcome ==
/// Result of an L1 insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Entry stored, `evicted` older entries removed to make room
    Stored { evicted: usize },
    /// Value alone exceeds the byte budget and was not stored
    TooLarge,
    /// Zero TTL: nothing stored, any previous entry removed
    Expired,
}

/// An L2 read in flight for one key.
#[derive(Debug, Clone, Copy, Default)]
struct PendingFill {
    /// Bumped by every write or removal of the key
    generation: u64,
    /// Lookups still holding the fill open
    readers: usize,
}

// == Memory Store ==
/// Bounded L1 storage with LRU eviction and TTL support.
///
/// Not synchronized; see [`crate::cache::MemoryCache`] for the shared handle.
#[derive(Debug)]
pub struct MemoryStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance statistics
    stats: MemoryStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// Optional byte budget over entry sizes
    max_bytes: Option<usize>,
    /// Sum of entry sizes
    bytes: usize,
    /// Keys with an L2 read in flight
    fills: HashMap<String, PendingFill>,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates a new store with the given entry capacity and byte budget.
    pub fn new(max_entries: usize, max_bytes: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: MemoryStats::new(max_entries, max_bytes),
            max_entries,
            max_bytes,
            bytes: 0,
            fills: HashMap::new(),
        }
    }

    // == Set ==
    /// Stores a value for `ttl`.
    ///
    /// An existing entry is replaced and its TTL reset. Eviction of least
    /// recently used entries runs before insertion until both the entry
    /// capacity and the byte budget can hold the new value.
    pub fn set(&mut self, key: &str, value: Arc<[u8]>, ttl: Duration) -> SetOutcome {
        self.supersede(key);
        self.insert(key, value, ttl)
    }

    fn insert(&mut self, key: &str, value: Arc<[u8]>, ttl: Duration) -> SetOutcome {
        if ttl.is_zero() {
            self.remove_entry(key);
            self.sync_occupancy();
            return SetOutcome::Expired;
        }

        let size = value.len();
        if self.max_bytes.is_some_and(|budget| size > budget) {
            self.remove_entry(key);
            self.stats.record_rejection();
            self.sync_occupancy();
            return SetOutcome::TooLarge;
        }

        // Overwrite frees its own slot first
        self.remove_entry(key);

        let mut evicted = 0;
        while self.needs_room(size) {
            match self.lru.evict_oldest() {
                Some(oldest) => {
                    if let Some(entry) = self.entries.remove(&oldest) {
                        self.bytes -= entry.size;
                    }
                    self.stats.record_eviction();
                    evicted += 1;
                }
                None => break,
            }
        }

        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        self.lru.touch(key);
        self.bytes += size;
        self.sync_occupancy();

        SetOutcome::Stored { evicted }
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<Arc<[u8]>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if expired {
            self.remove_entry(key);
            self.stats.record_expirations(1);
            self.stats.record_miss();
            self.sync_occupancy();
            return None;
        }

        self.stats.record_hit();
        self.lru.touch(key);
        self.entries.get(key).map(|entry| Arc::clone(&entry.value))
    }

    // == Peek ==
    /// Returns a live entry without touching recency or stats.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key).filter(|entry| !entry.is_expired())
    }

    // == Delete ==
    /// Removes an entry by key, returning whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.supersede(key);
        let removed = self.remove_entry(key);
        self.sync_occupancy();
        removed
    }

    // == Delete Namespace ==
    /// Removes every entry whose key belongs to `namespace`.
    pub fn delete_namespace(&mut self, namespace: &str) -> usize {
        self.delete_where(|key| namespace_of(key) == Some(namespace))
    }

    // == Delete Identifier ==
    /// Removes every payload variant of one identifier.
    ///
    /// `identifier_digest` is the value of `keys::identifier_digest`.
    pub fn delete_identifier(&mut self, namespace: &str, identifier_digest: &str) -> usize {
        self.delete_where(|key| belongs_to_identifier(key, namespace, identifier_digest))
    }

    fn delete_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        for (key, fill) in self.fills.iter_mut() {
            if predicate(key) {
                fill.generation += 1;
            }
        }

        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();

        for key in &doomed {
            self.remove_entry(key);
        }
        self.sync_occupancy();
        doomed.len()
    }

    // == Clear ==
    /// Removes all entries, returning how many there were.
    pub fn clear(&mut self) -> usize {
        for fill in self.fills.values_mut() {
            fill.generation += 1;
        }
        let count = self.entries.len();
        self.entries.clear();
        self.entries.shrink_to_fit();
        self.lru.clear();
        self.bytes = 0;
        self.sync_occupancy();
        count
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the store.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry(key);
        }

        self.stats.record_expirations(expired_keys.len());
        self.sync_occupancy();
        expired_keys.len()
    }

    // == Fills ==
    /// Looks a key up and opens an L2 fill for it under the same lock.
    ///
    /// Returns the live value, if any, and the generation that
    /// [`complete_fill`](Self::complete_fill) must still observe. Every
    /// `begin_fill` must be paired with an [`end_fill`](Self::end_fill).
    pub fn begin_fill(&mut self, key: &str) -> (Option<Arc<[u8]>>, u64) {
        let value = self.get(key);
        let fill = self.fills.entry(key.to_string()).or_default();
        fill.readers += 1;
        (value, fill.generation)
    }

    /// Stores a value fetched from L2 unless the key was written or removed
    /// after the fill began. Returns None when the value was dropped.
    pub fn complete_fill(
        &mut self,
        key: &str,
        value: Arc<[u8]>,
        ttl: Duration,
        generation: u64,
    ) -> Option<SetOutcome> {
        match self.fills.get(key) {
            Some(fill) if fill.generation == generation => Some(self.insert(key, value, ttl)),
            _ => None,
        }
    }

    /// Closes a fill opened by [`begin_fill`](Self::begin_fill).
    pub fn end_fill(&mut self, key: &str) {
        if let Some(fill) = self.fills.get_mut(key) {
            fill.readers = fill.readers.saturating_sub(1);
            if fill.readers == 0 {
                self.fills.remove(key);
            }
        }
    }

    /// Number of keys with an open fill.
    pub fn open_fills(&self) -> usize {
        self.fills.len()
    }

    fn supersede(&mut self, key: &str) {
        if let Some(fill) = self.fills.get_mut(key) {
            fill.generation += 1;
        }
    }

    // == Stats ==
    /// Returns current statistics.
    pub fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }

    // == Length ==
    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the current sum of entry sizes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    fn needs_room(&self, incoming: usize) -> bool {
        if self.entries.len() >= self.max_entries {
            return true;
        }
        match self.max_bytes {
            Some(budget) => self.bytes + incoming > budget,
            None => false,
        }
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.bytes -= entry.size;
                self.lru.remove(key);
                true
            }
            None => false,
        }
    }

    fn sync_occupancy(&mut self) {
        self.stats.set_occupancy(self.entries.len(), self.bytes);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    const TTL: Duration = Duration::from_secs(300);

    fn bytes(s: &str) -> Arc<[u8]> {
        Arc::from(s.as_bytes())
    }

    fn text(value: Option<Arc<[u8]>>) -> Option<String> {
        value.map(|v| String::from_utf8(v.to_vec()).unwrap())
    }

    #[test]
    fn test_store_new() {
        let store = MemoryStore::new(100, None);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.bytes(), 0);
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = MemoryStore::new(100, None);

        let outcome = store.set("key1", bytes("value1"), TTL);

        assert_eq!(outcome, SetOutcome::Stored { evicted: 0 });
        assert_eq!(text(store.get("key1")), Some("value1".to_string()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.bytes(), 6);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = MemoryStore::new(100, None);
        assert!(store.get("nonexistent").is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_store_delete() {
        let mut store = MemoryStore::new(100, None);

        store.set("key1", bytes("value1"), TTL);
        assert!(store.delete("key1"));

        assert!(store.is_empty());
        assert_eq!(store.bytes(), 0);
        assert!(store.get("key1").is_none());
        assert!(!store.delete("key1"));
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = MemoryStore::new(100, None);

        store.set("key1", bytes("value1"), TTL);
        store.set("key1", bytes("v2"), TTL);

        assert_eq!(text(store.get("key1")), Some("v2".to_string()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.bytes(), 2);
    }

    #[test]
    fn test_store_overwrite_at_capacity_does_not_evict() {
        let mut store = MemoryStore::new(2, None);

        store.set("a", bytes("1"), TTL);
        store.set("b", bytes("2"), TTL);
        let outcome = store.set("a", bytes("3"), TTL);

        assert_eq!(outcome, SetOutcome::Stored { evicted: 0 });
        assert!(store.get("b").is_some());
        assert_eq!(store.stats().evictions, 0);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let mut store = MemoryStore::new(100, None);

        store.set("key1", bytes("value1"), Duration::from_millis(10));
        assert!(store.get("key1").is_some());

        sleep(Duration::from_millis(20));

        assert!(store.get("key1").is_none());
        assert_eq!(store.stats().expirations, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_zero_ttl_stores_nothing() {
        let mut store = MemoryStore::new(100, None);

        store.set("key1", bytes("value1"), TTL);
        let outcome = store.set("key1", bytes("value2"), Duration::ZERO);

        assert_eq!(outcome, SetOutcome::Expired);
        assert!(store.get("key1").is_none());
    }

    #[test]
    fn test_store_lru_eviction() {
        let mut store = MemoryStore::new(3, None);

        store.set("key1", bytes("value1"), TTL);
        store.set("key2", bytes("value2"), TTL);
        store.set("key3", bytes("value3"), TTL);

        // Cache is full, adding key4 should evict key1 (oldest)
        let outcome = store.set("key4", bytes("value4"), TTL);

        assert_eq!(outcome, SetOutcome::Stored { evicted: 1 });
        assert_eq!(store.len(), 3);
        assert!(store.get("key1").is_none());
        assert!(store.get("key2").is_some());
        assert!(store.get("key3").is_some());
        assert!(store.get("key4").is_some());
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let mut store = MemoryStore::new(3, None);

        store.set("key1", bytes("value1"), TTL);
        store.set("key2", bytes("value2"), TTL);
        store.set("key3", bytes("value3"), TTL);

        // Access key1 to make it most recently used
        store.get("key1").unwrap();

        // Adding key4 should evict key2 (now oldest)
        store.set("key4", bytes("value4"), TTL);

        assert!(store.get("key1").is_some());
        assert!(store.get("key2").is_none());
    }

    #[test]
    fn test_store_byte_budget_evicts_until_value_fits() {
        let mut store = MemoryStore::new(100, Some(10));

        store.set("a", bytes("aaaa"), TTL);
        store.set("b", bytes("bbbb"), TTL);
        let outcome = store.set("c", bytes("cccccc"), TTL);

        // 4 + 4 + 6 > 10, evicting a alone leaves exactly 10
        assert_eq!(outcome, SetOutcome::Stored { evicted: 1 });
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert_eq!(store.bytes(), 10);
    }

    #[test]
    fn test_store_rejects_value_larger_than_budget() {
        let mut store = MemoryStore::new(100, Some(4));

        store.set("small", bytes("ok"), TTL);
        let outcome = store.set("big", bytes("too large"), TTL);

        assert_eq!(outcome, SetOutcome::TooLarge);
        assert!(store.get("big").is_none());
        assert!(store.get("small").is_some());
        assert_eq!(store.stats().rejected, 1);
    }

    #[test]
    fn test_store_delete_namespace() {
        let mut store = MemoryStore::new(100, None);
        let hex = "0123456789abcdef0123456789abcdef";

        store.set(&format!("embedding:{}", hex), bytes("1"), TTL);
        store.set(&format!("search_result:{}", hex), bytes("2"), TTL);
        store.set(&format!("embedding:v2:{}", hex), bytes("3"), TTL);

        assert_eq!(store.delete_namespace("embedding"), 1);
        assert_eq!(store.len(), 2);
        assert!(store.peek(&format!("embedding:v2:{}", hex)).is_some());
    }

    #[test]
    fn test_store_stats() {
        let mut store = MemoryStore::new(100, None);

        store.set("key1", bytes("value1"), TTL);
        store.get("key1").unwrap(); // hit
        let _ = store.get("nonexistent"); // miss

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_bytes, 6);
    }

    #[test]
    fn test_store_cleanup_expired() {
        let mut store = MemoryStore::new(100, None);

        store.set("key1", bytes("value1"), Duration::from_millis(10));
        store.set("key2", bytes("value2"), Duration::from_secs(10));

        sleep(Duration::from_millis(20));

        let removed = store.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.bytes(), 6);
        assert!(store.get("key2").is_some());
    }

    #[test]
    fn test_store_clear() {
        let mut store = MemoryStore::new(100, None);

        store.set("key1", bytes("value1"), TTL);
        store.set("key2", bytes("value2"), TTL);

        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert_eq!(store.bytes(), 0);
        assert_eq!(store.stats().total_entries, 0);
    }

    #[test]
    fn test_store_fill_is_stored_when_untouched() {
        let mut store = MemoryStore::new(10, None);

        let (cached, generation) = store.begin_fill("k");
        assert!(cached.is_none());

        let outcome = store.complete_fill("k", bytes("remote"), TTL, generation);
        store.end_fill("k");

        assert_eq!(outcome, Some(SetOutcome::Stored { evicted: 0 }));
        assert_eq!(text(store.get("k")), Some("remote".to_string()));
        assert_eq!(store.open_fills(), 0);
    }

    #[test]
    fn test_store_fill_is_dropped_after_set() {
        let mut store = MemoryStore::new(10, None);

        let (_, generation) = store.begin_fill("k");
        store.set("k", bytes("new"), TTL);

        assert_eq!(store.complete_fill("k", bytes("old"), TTL, generation), None);
        store.end_fill("k");
        assert_eq!(text(store.get("k")), Some("new".to_string()));
    }

    #[test]
    fn test_store_fill_is_dropped_after_removal() {
        let hex = "0123456789abcdef0123456789abcdef";
        let key = format!("embedding:{}", hex);

        let removals: [fn(&mut MemoryStore, &str); 4] = [
            |s: &mut MemoryStore, k: &str| {
                s.delete(k);
            },
            |s: &mut MemoryStore, _: &str| {
                s.delete_namespace("embedding");
            },
            |s: &mut MemoryStore, _: &str| {
                s.delete_identifier("embedding", "0123456789abcdef");
            },
            |s: &mut MemoryStore, _: &str| {
                s.clear();
            },
        ];

        for remove in removals {
            let mut store = MemoryStore::new(10, None);
            let (_, generation) = store.begin_fill(&key);
            remove(&mut store, &key);

            assert_eq!(store.complete_fill(&key, bytes("old"), TTL, generation), None);
            store.end_fill(&key);
            assert!(store.get(&key).is_none());
        }
    }

    #[test]
    fn test_store_fill_survives_unrelated_writes() {
        let mut store = MemoryStore::new(10, None);

        let (_, generation) = store.begin_fill("k");
        store.set("other", bytes("x"), TTL);
        store.delete("other");

        assert!(store.complete_fill("k", bytes("v"), TTL, generation).is_some());
        store.end_fill("k");
    }

    #[test]
    fn test_store_overlapping_fills_share_a_slot() {
        let mut store = MemoryStore::new(10, None);

        let (_, first) = store.begin_fill("k");
        let (_, second) = store.begin_fill("k");
        assert_eq!(first, second);

        store.end_fill("k");
        assert_eq!(store.open_fills(), 1);
        store.end_fill("k");
        assert_eq!(store.open_fills(), 0);
    }

    #[test]
    fn test_store_delete_identifier() {
        let mut store = MemoryStore::new(100, None);
        let id = "0123456789abcdef";

        store.set(&format!("embedding:{}{}", id, "1111111111111111"), bytes("1"), TTL);
        store.set(&format!("embedding:{}{}", id, "2222222222222222"), bytes("2"), TTL);
        store.set(&format!("embedding:{}{}", "fedcba9876543210", "1111111111111111"), bytes("3"), TTL);
        store.set(&format!("search_result:{}{}", id, "1111111111111111"), bytes("4"), TTL);

        assert_eq!(store.delete_identifier("embedding", id), 2);
        assert_eq!(store.len(), 2);
    }
}
