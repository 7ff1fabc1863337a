//! Cache Manager Module
//!
//! Composes the key manager, the memory tier and the remote tier into one
//! read-through, write-through cache with an explicit lifecycle.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::cache::{FillTicket, MemoryCache, SetOutcome};
use crate::config::{CacheConfig, WriteMode};
use crate::error::{CacheError, Result};
use crate::keys::{generate_key, identifier_digest, CacheKey};
use crate::remote::{RedisCache, RemoteCache, RemoteEntry};
use crate::stats::{CacheStats, LookupOutcome, StatsRecorder};
use crate::tasks::spawn_cleanup_task;

// == Lookup Types ==
/// The tier that answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// In-process L1
    Memory,
    /// Shared L2
    Remote,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Memory => f.write_str("l1"),
            Tier::Remote => f.write_str("l2"),
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit { value: T, tier: Tier },
    Miss,
}

impl<T> CacheLookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit { .. })
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookup::Miss)
    }

    /// The tier that answered, None on a miss.
    pub fn tier(&self) -> Option<Tier> {
        match self {
            CacheLookup::Hit { tier, .. } => Some(*tier),
            CacheLookup::Miss => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            CacheLookup::Hit { value, .. } => Some(value),
            CacheLookup::Miss => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            CacheLookup::Hit { value, .. } => Some(value),
            CacheLookup::Miss => None,
        }
    }
}

/// Entries removed by [`CacheManager::clear`], per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Cleared {
    pub memory: usize,
    pub remote: usize,
}

// == Lifecycle ==
/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Ready,
    Closed,
}

struct Tiers {
    memory: Option<MemoryCache>,
    remote: Option<Arc<dyn RemoteCache>>,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for Tiers {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

enum Lifecycle {
    Uninitialized,
    Ready(Arc<Tiers>),
    Closed,
}

// == Cache Manager ==
/// Two-tier cache keyed by (namespace, identifier, payload).
///
/// Share one manager between tasks with `Arc`. Every operation other than
/// [`key_for`](Self::key_for) requires [`initialize`](Self::initialize) first
/// and fails with `Closed` after [`cleanup`](Self::cleanup).
///
/// Remote failures never reach callers: a failed read is a miss, a failed
/// write is logged and dropped, and both are counted in `remote_errors`.
pub struct CacheManager {
    config: CacheConfig,
    injected_remote: Option<Arc<dyn RemoteCache>>,
    lifecycle: RwLock<Lifecycle>,
    // Serializes initialize() and cleanup()
    transition: tokio::sync::Mutex<()>,
    stats: Arc<StatsRecorder>,
    pending_writes: Mutex<JoinSet<()>>,
}

impl CacheManager {
    /// Creates an uninitialized manager. L2, when enabled, is Redis.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            injected_remote: None,
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            transition: tokio::sync::Mutex::new(()),
            stats: Arc::new(StatsRecorder::new()),
            pending_writes: Mutex::new(JoinSet::new()),
        }
    }

    /// Creates an uninitialized manager using `remote` as its L2.
    ///
    /// Injecting a remote enables the remote tier regardless of
    /// `enable_redis_cache`.
    pub fn with_remote(mut config: CacheConfig, remote: Arc<dyn RemoteCache>) -> Self {
        config.enable_redis_cache = true;
        Self {
            injected_remote: Some(remote),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn state(&self) -> ManagerState {
        match &*self.lifecycle.read() {
            Lifecycle::Uninitialized => ManagerState::Uninitialized,
            Lifecycle::Ready(_) => ManagerState::Ready,
            Lifecycle::Closed => ManagerState::Closed,
        }
    }

    /// Name of the active remote backend, None when L2 is off or the manager
    /// is not ready.
    pub fn remote_backend(&self) -> Option<&'static str> {
        let tiers = self.tiers().ok()?;
        tiers.remote.as_ref().map(|remote| remote.name())
    }

    fn tiers(&self) -> Result<Arc<Tiers>> {
        match &*self.lifecycle.read() {
            Lifecycle::Ready(tiers) => Ok(Arc::clone(tiers)),
            Lifecycle::Uninitialized => Err(CacheError::Uninitialized),
            Lifecycle::Closed => Err(CacheError::Closed),
        }
    }

    // == Initialize ==
    /// Validates the configuration, builds the tiers and starts the sweep.
    ///
    /// An unreachable remote tier is logged and disabled, never fatal.
    /// Calling this on a ready manager is a no-op.
    ///
    /// # Errors
    /// `Configuration` for an invalid config, `Closed` after cleanup.
    pub async fn initialize(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        match self.state() {
            ManagerState::Ready => return Ok(()),
            ManagerState::Closed => return Err(CacheError::Closed),
            ManagerState::Uninitialized => {}
        }

        self.config.validate()?;

        let memory = self
            .config
            .enable_memory_cache
            .then(|| MemoryCache::new(self.config.memory_max_size, self.config.memory_max_bytes));

        let remote = self.connect_remote().await;

        let sweeper = match &memory {
            Some(cache) if self.config.cleanup_interval > 0 => Some(spawn_cleanup_task(
                cache.clone(),
                Duration::from_secs(self.config.cleanup_interval),
            )),
            _ => None,
        };

        info!(
            memory = memory.is_some(),
            remote = remote.as_ref().map_or("disabled", |r| r.name()),
            max_entries = self.config.memory_max_size,
            default_ttl_secs = self.config.default_ttl_seconds,
            format = %self.config.serialization_format,
            write_mode = ?self.config.write_mode,
            "Cache manager initialized"
        );

        *self.lifecycle.write() = Lifecycle::Ready(Arc::new(Tiers {
            memory,
            remote,
            sweeper,
        }));
        Ok(())
    }

    async fn connect_remote(&self) -> Option<Arc<dyn RemoteCache>> {
        if !self.config.enable_redis_cache {
            return None;
        }

        if let Some(remote) = &self.injected_remote {
            match tokio::time::timeout(self.config.remote.timeout(), remote.ping()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(backend = remote.name(), error = %e, "Remote tier not answering, keeping it attached"),
                Err(_) => warn!(backend = remote.name(), "Remote tier ping timed out, keeping it attached"),
            }
            return Some(Arc::clone(remote));
        }

        match RedisCache::connect(&self.config.remote).await {
            Ok(redis) => Some(Arc::new(redis)),
            Err(e) => {
                warn!(
                    url = %self.config.remote.url(),
                    error = %e,
                    "Redis unreachable, continuing with memory tier only"
                );
                None
            }
        }
    }

    // == Get ==
    /// Looks up a value, L1 first, then L2.
    ///
    /// An L2 hit is copied into L1 with the remote's remaining TTL, capped at
    /// the default TTL, unless the key was written or invalidated while L2
    /// was being read. A stored value that does not decode as `T` is a miss.
    ///
    /// # Errors
    /// `Serialization` if the payload cannot be canonicalized, plus the
    /// lifecycle errors.
    pub async fn get<T, P>(
        &self,
        namespace: &str,
        identifier: &str,
        payload: &P,
    ) -> Result<CacheLookup<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let tiers = self.tiers()?;
        let key = generate_key(namespace, identifier, payload)?;
        let format = self.config.serialization_format;

        let mut fill: Option<FillTicket> = None;
        if let Some(memory) = &tiers.memory {
            let cached = if tiers.remote.is_some() {
                let (cached, ticket) = memory.begin_fill(key.as_str());
                fill = Some(ticket);
                cached
            } else {
                memory.get(key.as_str())
            };

            if let Some(bytes) = cached {
                match format.decode::<T>(&bytes) {
                    Ok(value) => {
                        self.stats.record_l1(true);
                        self.stats.record_lookup(namespace, LookupOutcome::L1Hit);
                        debug!(key = %key, tier = %Tier::Memory, "Cache hit");
                        return Ok(CacheLookup::Hit {
                            value,
                            tier: Tier::Memory,
                        });
                    }
                    Err(e) => warn!(key = %key, error = %e, "L1 value failed to decode, treating as miss"),
                }
            }
            self.stats.record_l1(false);
        }

        if let Some(remote) = &tiers.remote {
            let fetched = bounded(
                &self.stats,
                self.config.remote.timeout(),
                "get",
                key.as_str(),
                remote.get(key.as_str()),
            )
            .await
            .flatten();

            if let Some(entry) = fetched {
                match format.decode::<T>(&entry.value) {
                    Ok(value) => {
                        self.stats.record_l2(true);
                        self.stats.record_lookup(namespace, LookupOutcome::L2Hit);
                        self.write_back(fill, &key, entry);
                        debug!(key = %key, tier = %Tier::Remote, "Cache hit");
                        return Ok(CacheLookup::Hit {
                            value,
                            tier: Tier::Remote,
                        });
                    }
                    Err(e) => warn!(key = %key, error = %e, "L2 value failed to decode, treating as miss"),
                }
            }
            self.stats.record_l2(false);
        }

        self.stats.record_lookup(namespace, LookupOutcome::Miss);
        debug!(key = %key, "Cache miss");
        Ok(CacheLookup::Miss)
    }

    fn write_back(&self, fill: Option<FillTicket>, key: &CacheKey, entry: RemoteEntry) {
        let Some(fill) = fill else {
            return;
        };

        let default_ttl = self.config.default_ttl();
        let ttl = entry
            .ttl_remaining
            .map_or(default_ttl, |remaining| remaining.min(default_ttl));

        match fill.complete(Arc::from(entry.value), ttl) {
            Some(SetOutcome::Stored { .. }) => {
                self.stats.record_write_back();
                debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Wrote L2 hit back into L1");
            }
            Some(_) => {}
            None => debug!(key = %key, "Key changed during the L2 read, write-back skipped"),
        }
    }

    // == Set ==
    /// Stores a value in every enabled tier and returns its key.
    ///
    /// Without `ttl`, L1 uses the default TTL and L2 uses the remote TTL. A
    /// zero TTL stores nothing and drops any previous value from both tiers.
    /// In `FireAndForget` mode the L2 write runs in the background and is
    /// flushed by [`cleanup`](Self::cleanup).
    ///
    /// # Errors
    /// `Serialization` if the payload or the value cannot be encoded, plus
    /// the lifecycle errors.
    pub async fn set<V, P>(
        &self,
        namespace: &str,
        identifier: &str,
        payload: &P,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<CacheKey>
    where
        V: Serialize + ?Sized,
        P: Serialize + ?Sized,
    {
        let tiers = self.tiers()?;
        let key = generate_key(namespace, identifier, payload)?;
        let bytes: Arc<[u8]> = Arc::from(self.config.serialization_format.encode(value)?);

        if ttl == Some(Duration::ZERO) {
            self.remove_key(&tiers, &key).await;
            debug!(key = %key, "Zero TTL, previous value dropped");
            self.stats.record_set(namespace);
            return Ok(key);
        }

        let memory_ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let remote_ttl = ttl.unwrap_or_else(|| self.config.remote_ttl());

        if let Some(memory) = &tiers.memory {
            match memory.set(key.as_str(), Arc::clone(&bytes), memory_ttl) {
                SetOutcome::Stored { evicted } => {
                    debug!(key = %key, size = bytes.len(), evicted, "Stored in L1");
                }
                SetOutcome::TooLarge => {
                    warn!(key = %key, size = bytes.len(), "Value exceeds the L1 byte budget, not kept in memory");
                }
                SetOutcome::Expired => debug!(key = %key, "TTL rounds to zero, nothing kept in L1"),
            }
        }

        if let Some(remote) = &tiers.remote {
            self.write_remote(Arc::clone(remote), key.clone(), bytes, remote_ttl)
                .await;
        }

        self.stats.record_set(namespace);
        Ok(key)
    }

    async fn write_remote(
        &self,
        remote: Arc<dyn RemoteCache>,
        key: CacheKey,
        bytes: Arc<[u8]>,
        ttl: Duration,
    ) {
        let stats = Arc::clone(&self.stats);
        let timeout = self.config.remote.timeout();

        let write = async move {
            bounded(&stats, timeout, "set", key.as_str(), remote.set(key.as_str(), &bytes, ttl)).await;
        };

        match self.config.write_mode {
            WriteMode::Await => write.await,
            WriteMode::FireAndForget => {
                let mut pending = self.pending_writes.lock();
                while pending.try_join_next().is_some() {}
                pending.spawn(write);
            }
        }
    }

    // == Invalidate ==
    // Removals go to L2 before L1. Dropping the L1 copy last also voids any
    // write-back still carrying the old L2 value.

    /// Removes one entry from both tiers, returning whether any tier held it.
    pub async fn invalidate<P>(&self, namespace: &str, identifier: &str, payload: &P) -> Result<bool>
    where
        P: Serialize + ?Sized,
    {
        let tiers = self.tiers()?;
        let key = generate_key(namespace, identifier, payload)?;

        let removed = self.remove_key(&tiers, &key).await;
        debug!(key = %key, removed, "Invalidated");
        Ok(removed)
    }

    async fn remove_key(&self, tiers: &Tiers, key: &CacheKey) -> bool {
        let mut removed = false;

        if let Some(remote) = &tiers.remote {
            removed |= bounded(
                &self.stats,
                self.config.remote.timeout(),
                "delete",
                key.as_str(),
                remote.delete(key.as_str()),
            )
            .await
            .unwrap_or(false);
        }

        if let Some(memory) = &tiers.memory {
            removed |= memory.delete(key.as_str());
        }

        removed
    }

    /// Removes every cached payload variant of `identifier` from both tiers.
    ///
    /// Returns the number of entries removed, summed over the tiers.
    pub async fn invalidate_identifier(&self, namespace: &str, identifier: &str) -> Result<usize> {
        let tiers = self.tiers()?;
        let digest = identifier_digest(namespace, identifier);
        let mut removed = 0;

        if let Some(remote) = &tiers.remote {
            removed += bounded(
                &self.stats,
                self.config.remote.timeout(),
                "delete_identifier",
                namespace,
                remote.delete_identifier(namespace, &digest),
            )
            .await
            .unwrap_or(0);
        }

        if let Some(memory) = &tiers.memory {
            removed += memory.delete_identifier(namespace, &digest);
        }

        info!(namespace, identifier = %digest, removed, "Invalidated identifier");
        Ok(removed)
    }

    /// Removes every entry of `namespace` from both tiers.
    ///
    /// Returns the number of entries removed, summed over the tiers.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<usize> {
        let tiers = self.tiers()?;
        let mut removed = 0;

        if let Some(remote) = &tiers.remote {
            removed += bounded(
                &self.stats,
                self.config.remote.timeout(),
                "delete_namespace",
                namespace,
                remote.delete_namespace(namespace),
            )
            .await
            .unwrap_or(0);
        }

        if let Some(memory) = &tiers.memory {
            removed += memory.delete_namespace(namespace);
        }

        info!(namespace, removed, "Invalidated namespace");
        Ok(removed)
    }

    /// Empties L1 and every L2 entry under this manager's key prefix.
    pub async fn clear(&self) -> Result<Cleared> {
        let tiers = self.tiers()?;
        let mut cleared = Cleared::default();

        if let Some(remote) = &tiers.remote {
            cleared.remote = bounded(
                &self.stats,
                self.config.remote.timeout(),
                "clear",
                "*",
                remote.clear(),
            )
            .await
            .unwrap_or(0);
        }

        if let Some(memory) = &tiers.memory {
            cleared.memory = memory.clear();
        }

        info!(memory = cleared.memory, remote = cleared.remote, "Cache cleared");
        Ok(cleared)
    }

    // == Get Or Compute ==
    /// Returns the cached value or runs `compute`, caches and returns its
    /// result.
    ///
    /// A failure to store the computed value is logged and the value is
    /// still returned. Errors from `compute` are returned as is and nothing
    /// is cached.
    pub async fn get_or_compute<T, P, F, Fut, E>(
        &self,
        namespace: &str,
        identifier: &str,
        payload: &P,
        ttl: Option<Duration>,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        if let CacheLookup::Hit { value, .. } = self.get::<T, P>(namespace, identifier, payload).await? {
            return Ok(value);
        }

        let value = compute().await?;

        if let Err(e) = self.set(namespace, identifier, payload, &value, ttl).await {
            warn!(namespace, identifier, error = %e, "Computed value could not be cached");
        }
        Ok(value)
    }

    /// Returns the key a lookup would use. Usable in any state.
    pub fn key_for<P>(&self, namespace: &str, identifier: &str, payload: &P) -> Result<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        generate_key(namespace, identifier, payload)
    }

    // == Stats ==
    /// Snapshot of counters and L1 occupancy.
    pub fn get_stats(&self) -> Result<CacheStats> {
        let tiers = self.tiers()?;
        let memory = tiers.memory.as_ref().map(MemoryCache::stats);
        Ok(self.stats.snapshot(memory))
    }

    // == Cleanup ==
    /// Flushes background writes, stops the sweep, closes L2 and empties L1.
    ///
    /// Idempotent. Afterwards every operation fails with `Closed`.
    pub async fn cleanup(&self) {
        let _transition = self.transition.lock().await;

        let previous = std::mem::replace(&mut *self.lifecycle.write(), Lifecycle::Closed);
        let Lifecycle::Ready(tiers) = previous else {
            debug!("Cleanup on a manager that was not ready");
            return;
        };

        let mut pending = std::mem::take(&mut *self.pending_writes.lock());
        let flushed = pending.len();
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Background remote write did not complete");
            }
        }

        if let Some(sweeper) = &tiers.sweeper {
            sweeper.abort();
        }

        if let Some(remote) = &tiers.remote {
            remote.close().await;
        }

        let dropped = tiers.memory.as_ref().map_or(0, MemoryCache::clear);

        info!(flushed, dropped, "Cache manager closed");
    }
}

/// Runs one remote operation under the tier timeout.
///
/// Failures and timeouts are logged and counted, then reported as `None`.
async fn bounded<T, F>(
    stats: &StatsRecorder,
    timeout: Duration,
    op: &'static str,
    key: &str,
    operation: F,
) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            stats.record_remote_error();
            warn!(op, key, error = %e, "Remote tier operation failed");
            None
        }
        Err(_) => {
            stats.record_remote_error();
            warn!(op, key, timeout_ms = timeout.as_millis() as u64, "Remote tier operation timed out");
            None
        }
    }
}
