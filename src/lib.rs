//! Tiered Cache - a two-level memoization cache
//!
//! Caches results of expensive computations (embeddings, searches, LLM
//! responses) under content-addressed keys, in an in-process LRU tier backed
//! by an optional shared Redis tier.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod manager;
pub mod remote;
pub mod stats;
pub mod tasks;

pub use codec::SerializationFormat;
pub use config::{CacheConfig, RemoteConfig, WriteMode};
pub use error::{CacheError, Result};
pub use keys::{generate_key, CacheKey};
pub use manager::{CacheLookup, CacheManager, Cleared, ManagerState, Tier};
pub use remote::{InMemoryRemote, RedisCache, RemoteCache, RemoteEntry};
pub use stats::{CacheStats, NamespaceStats, TierStats};
