//! Cache Entry Module
//!
//! Defines the structure for individual L1 entries with TTL support.

use std::sync::Arc;
use std::time::{Duration, Instant};

// == Cache Entry ==
/// Represents a single L1 entry: encoded value plus metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Encoded value, shared so hits can be returned without copying
    pub value: Arc<[u8]>,
    /// Insertion time
    pub inserted_at: Instant,
    /// Expiration time, None = the TTL overflowed the clock and never expires
    pub expires_at: Option<Instant>,
    /// Size estimate in bytes (encoded length)
    pub size: usize,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry that expires `ttl` from now.
    pub fn new(value: Arc<[u8]>, ttl: Duration) -> Self {
        let now = Instant::now();
        let size = value.len();

        Self {
            value,
            inserted_at: now,
            expires_at: now.checked_add(ttl),
            size,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// Boundary condition: an entry is expired once the current time is
    /// greater than or equal to its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Expiry check against a caller-supplied clock reading.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns the remaining TTL, `Some(ZERO)` once expired, or None if the
    /// entry never expires.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }

    /// Time elapsed since insertion.
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }
}
