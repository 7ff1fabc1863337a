//! Memory Cache Module
//!
//! Thread-safe handle over the L1 store.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::{MemoryStats, MemoryStore, SetOutcome};

// == Memory Cache ==
/// Shared L1 tier.
///
/// Every operation takes one short `parking_lot::Mutex` critical section and
/// never awaits, so it is safe to call from async code without suspending.
/// Values are handed out as `Arc<[u8]>` so decoding happens outside the lock.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<Mutex<MemoryStore>>,
}

impl MemoryCache {
    /// Creates an empty L1 tier.
    pub fn new(max_entries: usize, max_bytes: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStore::new(max_entries, max_bytes))),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.inner.lock().get(key)
    }

    pub fn set(&self, key: &str, value: Arc<[u8]>, ttl: Duration) -> SetOutcome {
        self.inner.lock().set(key, value, ttl)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().delete(key)
    }

    pub fn delete_namespace(&self, namespace: &str) -> usize {
        self.inner.lock().delete_namespace(namespace)
    }

    pub fn delete_identifier(&self, namespace: &str, identifier_digest: &str) -> usize {
        self.inner.lock().delete_identifier(namespace, identifier_digest)
    }

    /// Looks a key up and, in the same critical section, opens a fill for a
    /// value about to be read from another tier.
    pub fn begin_fill(&self, key: &str) -> (Option<Arc<[u8]>>, FillTicket) {
        let (value, generation) = self.inner.lock().begin_fill(key);
        let ticket = FillTicket {
            cache: self.clone(),
            key: key.to_string(),
            generation,
        };
        (value, ticket)
    }

    pub fn clear(&self) -> usize {
        self.inner.lock().clear()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.inner.lock().cleanup_expired()
    }

    /// Remaining TTL of a live entry.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        self.inner
            .lock()
            .peek(key)
            .and_then(|entry| entry.ttl_remaining())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshot of L1 statistics taken under the lock.
    pub fn stats(&self) -> MemoryStats {
        self.inner.lock().stats()
    }
}

// == Fill Ticket ==
/// An open fill for one key.
///
/// [`complete`](Self::complete) stores the value only if nothing wrote or
/// removed the key since the ticket was issued. Dropping the ticket closes
/// the fill, so a cancelled lookup leaves nothing behind.
#[derive(Debug)]
pub struct FillTicket {
    cache: MemoryCache,
    key: String,
    generation: u64,
}

impl FillTicket {
    /// Returns None when the value was superseded and not stored.
    pub fn complete(self, value: Arc<[u8]>, ttl: Duration) -> Option<SetOutcome> {
        // Release the lock before Drop takes it again.
        let outcome = self
            .cache
            .inner
            .lock()
            .complete_fill(&self.key, value, ttl, self.generation);
        outcome
    }
}

impl Drop for FillTicket {
    fn drop(&mut self) {
        self.cache.inner.lock().end_fill(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_handles_share_one_store() {
        let cache = MemoryCache::new(10, None);
        let other = cache.clone();

        cache.set("k", Arc::from(&b"v"[..]), Duration::from_secs(60));

        assert_eq!(other.get("k").as_deref(), Some(&b"v"[..]));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_respect_capacity() {
        let cache = MemoryCache::new(16, None);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("t{}-{}", t, i);
                        cache.set(&key, Arc::from(key.as_bytes()), Duration::from_secs(60));
                        assert!(cache.len() <= 16);
                        if let Some(value) = cache.get(&key) {
                            assert_eq!(&*value, key.as_bytes());
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 16);
        assert_eq!(stats.evictions, 8 * 500 - 16);
    }

    #[test]
    fn test_ttl_remaining_of_live_entry() {
        let cache = MemoryCache::new(10, None);
        cache.set("k", Arc::from(&b"v"[..]), Duration::from_secs(30));

        let remaining = cache.ttl_remaining("k").unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(cache.ttl_remaining("missing").is_none());
    }

    #[test]
    fn test_fill_ticket_drops_superseded_value() {
        let cache = MemoryCache::new(10, None);
        let ttl = Duration::from_secs(60);

        let (cached, ticket) = cache.begin_fill("k");
        assert!(cached.is_none());
        cache.set("k", Arc::from(&b"new"[..]), ttl);

        assert!(ticket.complete(Arc::from(&b"old"[..]), ttl).is_none());
        assert_eq!(cache.get("k").as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_dropped_ticket_closes_fill() {
        let cache = MemoryCache::new(10, None);

        let (_, ticket) = cache.begin_fill("k");
        assert_eq!(cache.inner.lock().open_fills(), 1);
        drop(ticket);
        assert_eq!(cache.inner.lock().open_fills(), 0);

        let (_, ticket) = cache.begin_fill("k");
        assert!(ticket
            .complete(Arc::from(&b"v"[..]), Duration::from_secs(60))
            .is_some());
        assert_eq!(cache.inner.lock().open_fills(), 0);
        assert_eq!(cache.get("k").as_deref(), Some(&b"v"[..]));
    }
}
