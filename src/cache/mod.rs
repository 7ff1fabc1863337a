//! Cache Module
//!
//! The in-process tier (L1): bounded memory with TTL expiration and LRU
//! eviction.

mod entry;
mod lru;
mod memory;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use memory::{FillTicket, MemoryCache};
pub use stats::MemoryStats;
pub use store::{MemoryStore, SetOutcome};
