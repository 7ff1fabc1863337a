//! Error types for the cache manager
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache manager.
///
/// Only `Configuration`, `Serialization`, `Uninitialized` and `Closed` ever
/// reach callers of [`crate::CacheManager`]. `TierUnavailable` is produced by
/// remote adapters and contained inside the manager.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Structurally invalid configuration (fatal at startup)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Payload or value could not be represented
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Remote tier failed, timed out, or is disconnected
    #[error("Cache tier unavailable: {0}")]
    TierUnavailable(String),

    /// Operation attempted before `initialize()`
    #[error("Cache manager is not initialized")]
    Uninitialized,

    /// Operation attempted after `cleanup()`
    #[error("Cache manager is closed")]
    Closed,
}

impl CacheError {
    /// Returns true for errors caused by the caller using the manager
    /// outside of its `Ready` state.
    pub fn is_misuse(&self) -> bool {
        matches!(self, CacheError::Uninitialized | CacheError::Closed)
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::TierUnavailable(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache manager.
pub type Result<T> = std::result::Result<T, CacheError>;
