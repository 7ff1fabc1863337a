//! Manager Statistics Module
//!
//! Lock-free counters updated on every lookup and write, plus the
//! serializable snapshot returned by `CacheManager::get_stats()`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::MemoryStats;

// == Snapshot Types ==
/// Hit and miss counts of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

/// Hit and miss counts of one namespace across both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// L1 lookups as seen by the manager
    pub l1: TierStats,
    /// L2 lookups, only counted after an L1 miss
    pub l2: TierStats,
    /// Lookups that missed every enabled tier
    pub misses: u64,
    /// Successful `set()` calls
    pub sets: u64,
    /// L2 hits copied into L1
    pub write_backs: u64,
    /// Failed or timed-out L2 operations
    pub remote_errors: u64,
    /// L1 evictions
    pub evictions: u64,
    /// L1 entries dropped by TTL
    pub expirations: u64,
    /// Full L1 snapshot, absent when L1 is disabled
    pub memory: Option<MemoryStats>,
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

impl CacheStats {
    /// Total lookups answered by any tier.
    pub fn hits(&self) -> u64 {
        self.l1.hits + self.l2.hits
    }

    /// Fraction of lookups answered by any tier.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits(), self.hits() + self.misses)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

// == Stats Recorder ==
#[derive(Debug, Default)]
struct NamespaceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

/// Outcome of one manager lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupOutcome {
    L1Hit,
    L2Hit,
    Miss,
}

/// Shared counters owned by one manager.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    write_backs: AtomicU64,
    remote_errors: AtomicU64,
    namespaces: RwLock<HashMap<String, Arc<NamespaceCounters>>>,
}

impl StatsRecorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_l1(&self, hit: bool) {
        let counter = if hit { &self.l1_hits } else { &self.l1_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_l2(&self, hit: bool) {
        let counter = if hit { &self.l2_hits } else { &self.l2_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the final outcome of a lookup against its namespace.
    pub(crate) fn record_lookup(&self, namespace: &str, outcome: LookupOutcome) {
        let counters = self.namespace(namespace);
        match outcome {
            LookupOutcome::L1Hit | LookupOutcome::L2Hit => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
            }
            LookupOutcome::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_set(&self, namespace: &str) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.namespace(namespace)
            .sets
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_back(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn namespace(&self, namespace: &str) -> Arc<NamespaceCounters> {
        if let Some(counters) = self.namespaces.read().get(namespace) {
            return Arc::clone(counters);
        }
        Arc::clone(
            self.namespaces
                .write()
                .entry(namespace.to_string())
                .or_default(),
        )
    }

    /// Builds a snapshot, folding in the L1 view when present.
    pub(crate) fn snapshot(&self, memory: Option<MemoryStats>) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let namespaces = self
            .namespaces
            .read()
            .iter()
            .map(|(name, counters)| {
                (
                    name.clone(),
                    NamespaceStats {
                        hits: load(&counters.hits),
                        misses: load(&counters.misses),
                        sets: load(&counters.sets),
                    },
                )
            })
            .collect();

        CacheStats {
            taken_at: Utc::now(),
            l1: TierStats {
                hits: load(&self.l1_hits),
                misses: load(&self.l1_misses),
            },
            l2: TierStats {
                hits: load(&self.l2_hits),
                misses: load(&self.l2_misses),
            },
            misses: load(&self.misses),
            sets: load(&self.sets),
            write_backs: load(&self.write_backs),
            remote_errors: load(&self.remote_errors),
            evictions: memory.as_ref().map_or(0, |m| m.evictions),
            expirations: memory.as_ref().map_or(0, |m| m.expirations),
            memory,
            namespaces,
        }
    }
}
