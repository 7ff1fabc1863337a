//! TTL Sweep Task
//!
//! Background task that periodically removes expired L1 entries. Lookups
//! already treat expired entries as absent; the sweep only reclaims memory.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::MemoryCache;

/// Spawns a background task that sweeps expired entries every `interval`.
///
/// The task runs until the returned handle is aborted. Each pass takes the
/// L1 lock once and never holds it across an await.
///
/// # Example
/// ```ignore
/// let cache = MemoryCache::new(1000, None);
/// let sweeper = spawn_cleanup_task(cache.clone(), Duration::from_secs(300));
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_cleanup_task(cache: MemoryCache, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting L1 sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.cleanup_expired();

            if removed > 0 {
                info!(removed, remaining = cache.len(), "L1 sweep removed expired entries");
            } else {
                debug!("L1 sweep found no expired entries");
            }
        }
    })
}
