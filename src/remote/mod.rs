//! Remote Cache Module
//!
//! The shared out-of-process tier (L2). The concrete client is hidden behind
//! [`RemoteCache`] so it can be swapped for an in-process stand-in.
//!
//! Implementations report failures as `CacheError::TierUnavailable`; the
//! manager downgrades those to misses and dropped writes.

mod in_memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::in_memory::InMemoryRemote;
pub use self::redis::RedisCache;

// == Remote Entry ==
/// A value read from the remote tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Encoded value bytes
    pub value: Vec<u8>,
    /// Remaining TTL reported by the store, None if it has no expiry
    pub ttl_remaining: Option<Duration>,
}

// == Remote Cache Trait ==
/// Minimal async key-value interface over the shared tier.
///
/// Keys passed in are generated cache keys; adapters may prefix them.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Fetches an entry, `Ok(None)` when absent.
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>>;

    /// Stores an entry that expires after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Deletes an entry, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Deletes every entry in a namespace, returning how many were removed.
    async fn delete_namespace(&self, namespace: &str) -> Result<usize>;

    /// Deletes every payload variant of one identifier in a namespace.
    ///
    /// `identifier_digest` is the value of `keys::identifier_digest`.
    async fn delete_identifier(&self, namespace: &str, identifier_digest: &str) -> Result<usize>;

    /// Deletes every entry owned by this adapter.
    async fn clear(&self) -> Result<usize>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Releases connections. Later calls fail with `TierUnavailable`.
    async fn close(&self);
}
