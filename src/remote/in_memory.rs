//! In-Process Remote Tier
//!
//! A `RemoteCache` living in process memory. It behaves like a shared store
//! (its clones share state, entries expire) and can be told to fail or lag,
//! which makes it the stand-in for Redis in tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{CacheError, Result};
use crate::keys::{belongs_to_identifier, namespace_of};
use crate::remote::{RemoteCache, RemoteEntry};

#[derive(Debug, Default)]
struct SharedState {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
    failing: AtomicBool,
    closed: AtomicBool,
    latency: Duration,
    calls: AtomicU64,
}

// == In-Memory Remote ==
/// Process-local implementation of the remote tier.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<SharedState>,
}

impl InMemoryRemote {
    /// Creates an empty, healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that delays every operation by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Arc::new(SharedState {
                latency,
                ..SharedState::default()
            }),
        }
    }

    /// Makes every subsequent operation fail with `TierUnavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Writes raw bytes directly, as another process sharing the store would.
    pub fn insert_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.state
            .entries
            .lock()
            .insert(key.to_string(), (value, expires_at));
    }

    /// Reads raw bytes of a live entry.
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.state.entries.lock();
        entries
            .get(key)
            .filter(|(_, expires_at)| !is_expired(*expires_at, Instant::now()))
            .map(|(value, _)| value.clone())
    }

    /// Remaining TTL of a live entry, None if absent or without expiry.
    pub fn ttl_raw(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.state.entries.lock();
        entries
            .get(key)
            .and_then(|(_, expires_at)| *expires_at)
            .filter(|expires_at| *expires_at > now)
            .map(|expires_at| expires_at - now)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .entries
            .lock()
            .values()
            .filter(|(_, expires_at)| !is_expired(*expires_at, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of operations attempted so far, including failed ones.
    pub fn calls(&self) -> u64 {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<()> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        if !self.state.latency.is_zero() {
            tokio::time::sleep(self.state.latency).await;
        }
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(CacheError::TierUnavailable("store closed".to_string()));
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(CacheError::TierUnavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = self.state.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }
}

fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| now >= at)
}

#[async_trait]
impl RemoteCache for InMemoryRemote {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>> {
        self.simulate().await?;

        let now = Instant::now();
        let mut entries = self.state.entries.lock();
        match entries.get(key) {
            Some((_, expires_at)) if is_expired(*expires_at, now) => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, expires_at)) => Ok(Some(RemoteEntry {
                value: value.clone(),
                ttl_remaining: expires_at.map(|at| at.saturating_duration_since(now)),
            })),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.simulate().await?;
        self.insert_raw(key, value.to_vec(), Some(ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.simulate().await?;
        Ok(self.state.entries.lock().remove(key).is_some())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<usize> {
        self.simulate().await?;
        Ok(self.remove_where(|key| namespace_of(key) == Some(namespace)))
    }

    async fn delete_identifier(&self, namespace: &str, identifier_digest: &str) -> Result<usize> {
        self.simulate().await?;
        Ok(self.remove_where(|key| belongs_to_identifier(key, namespace, identifier_digest)))
    }

    async fn clear(&self) -> Result<usize> {
        self.simulate().await?;
        Ok(self.remove_where(|_| true))
    }

    async fn ping(&self) -> Result<()> {
        self.simulate().await
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}
