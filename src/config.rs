//! Configuration Module
//!
//! Handles loading, defaulting and validating cache manager configuration.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::SerializationFormat;
use crate::error::{CacheError, Result};

/// Longest accepted TTL (about 136 years).
const MAX_TTL_SECONDS: f64 = u32::MAX as f64;

// == Write Mode ==
/// Controls whether `set()` waits for the remote tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Await the L2 write before `set()` returns
    #[default]
    Await,
    /// Spawn the L2 write and return immediately
    FireAndForget,
}

impl FromStr for WriteMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "await" | "sync" => Ok(WriteMode::Await),
            "fire_and_forget" | "async" => Ok(WriteMode::FireAndForget),
            other => Err(CacheError::Configuration(format!(
                "unknown write mode '{}'",
                other
            ))),
        }
    }
}

// == Remote Config ==
/// Connection parameters for the shared remote tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Redis logical database
    pub db: i64,
    /// Prefix prepended to every cache key stored remotely
    pub key_prefix: String,
    /// Upper bound for a single remote operation in milliseconds
    pub timeout_ms: u64,
    /// TTL for remote writes made without an explicit TTL, None uses the
    /// default TTL
    pub ttl_seconds: Option<f64>,
}

impl RemoteConfig {
    /// Returns the `redis://` connection URL.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    /// Returns the per-operation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            key_prefix: "cache:".to_string(),
            timeout_ms: 500,
            ttl_seconds: None,
        }
    }
}

// == Cache Config ==
/// Cache manager configuration.
///
/// All values can be configured via `CACHE_*` environment variables with
/// sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the in-process tier (L1)
    pub enable_memory_cache: bool,
    /// Enable the shared remote tier (L2)
    pub enable_redis_cache: bool,
    /// Maximum number of L1 entries
    pub memory_max_size: usize,
    /// Optional L1 byte budget over encoded values
    pub memory_max_bytes: Option<usize>,
    /// TTL applied when `set()` is called without one
    pub default_ttl_seconds: f64,
    /// Remote tier endpoint and behaviour
    pub remote: RemoteConfig,
    /// Encoding used for cached values
    pub serialization_format: SerializationFormat,
    /// Whether `set()` awaits the remote write
    pub write_mode: WriteMode,
    /// Interval of the background L1 sweep in seconds, 0 disables it
    pub cleanup_interval: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLE_MEMORY` - Enable L1 (default: true)
    /// - `CACHE_ENABLE_REDIS` - Enable L2 (default: false)
    /// - `CACHE_MEMORY_MAX_SIZE` - Maximum L1 entries (default: 1000)
    /// - `CACHE_MEMORY_MAX_BYTES` - L1 byte budget (default: unbounded)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 3600)
    /// - `CACHE_REDIS_HOST` / `CACHE_REDIS_PORT` / `CACHE_REDIS_DB`
    /// - `CACHE_REDIS_PREFIX` - Remote key prefix (default: "cache:")
    /// - `CACHE_REDIS_TIMEOUT_MS` - Remote operation timeout (default: 500)
    /// - `CACHE_REDIS_TTL` - Remote TTL in seconds (default: the default TTL)
    /// - `CACHE_SERIALIZATION` - `json` or `cbor` (default: json)
    /// - `CACHE_WRITE_MODE` - `await` or `fire_and_forget` (default: await)
    /// - `CACHE_CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 300)
    ///
    /// Unlike silently defaulting, malformed values are reported as
    /// configuration errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let remote_defaults = RemoteConfig::default();

        let memory_max_bytes = match lookup("CACHE_MEMORY_MAX_BYTES") {
            Some(raw) if !raw.trim().is_empty() => {
                Some(parse_value::<usize>("CACHE_MEMORY_MAX_BYTES", &raw)?)
            }
            _ => defaults.memory_max_bytes,
        };

        let remote_ttl_seconds = match lookup("CACHE_REDIS_TTL") {
            Some(raw) if !raw.trim().is_empty() => Some(parse_value::<f64>("CACHE_REDIS_TTL", &raw)?),
            _ => remote_defaults.ttl_seconds,
        };

        let config = Self {
            enable_memory_cache: parse_bool(
                &lookup,
                "CACHE_ENABLE_MEMORY",
                defaults.enable_memory_cache,
            )?,
            enable_redis_cache: parse_bool(
                &lookup,
                "CACHE_ENABLE_REDIS",
                defaults.enable_redis_cache,
            )?,
            memory_max_size: parse_var(&lookup, "CACHE_MEMORY_MAX_SIZE", defaults.memory_max_size)?,
            memory_max_bytes,
            default_ttl_seconds: parse_var(
                &lookup,
                "CACHE_DEFAULT_TTL",
                defaults.default_ttl_seconds,
            )?,
            remote: RemoteConfig {
                host: lookup("CACHE_REDIS_HOST").unwrap_or(remote_defaults.host),
                port: parse_var(&lookup, "CACHE_REDIS_PORT", remote_defaults.port)?,
                db: parse_var(&lookup, "CACHE_REDIS_DB", remote_defaults.db)?,
                key_prefix: lookup("CACHE_REDIS_PREFIX").unwrap_or(remote_defaults.key_prefix),
                timeout_ms: parse_var(
                    &lookup,
                    "CACHE_REDIS_TIMEOUT_MS",
                    remote_defaults.timeout_ms,
                )?,
                ttl_seconds: remote_ttl_seconds,
            },
            serialization_format: parse_var(
                &lookup,
                "CACHE_SERIALIZATION",
                defaults.serialization_format,
            )?,
            write_mode: parse_var(&lookup, "CACHE_WRITE_MODE", defaults.write_mode)?,
            cleanup_interval: parse_var(
                &lookup,
                "CACHE_CLEANUP_INTERVAL",
                defaults.cleanup_interval,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    // == Validate ==
    /// Rejects structurally invalid configurations.
    pub fn validate(&self) -> Result<()> {
        if self.enable_memory_cache && self.memory_max_size == 0 {
            return Err(CacheError::Configuration(
                "memory_max_size must be at least 1 when the memory cache is enabled".to_string(),
            ));
        }

        if self.memory_max_bytes == Some(0) {
            return Err(CacheError::Configuration(
                "memory_max_bytes must be positive when set".to_string(),
            ));
        }

        check_ttl("default_ttl_seconds", self.default_ttl_seconds)?;
        if let Some(ttl) = self.remote.ttl_seconds {
            check_ttl("remote ttl_seconds", ttl)?;
        }

        if self.enable_redis_cache && self.remote.timeout_ms == 0 {
            return Err(CacheError::Configuration(
                "remote timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the default TTL as a Duration.
    ///
    /// Must only be called on a validated config.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.default_ttl_seconds)
    }

    /// Returns the TTL of remote writes made without an explicit TTL.
    ///
    /// Must only be called on a validated config.
    pub fn remote_ttl(&self) -> Duration {
        self.remote
            .ttl_seconds
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| self.default_ttl())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_memory_cache: true,
            enable_redis_cache: false,
            memory_max_size: 1000,
            memory_max_bytes: None,
            default_ttl_seconds: 3600.0,
            remote: RemoteConfig::default(),
            serialization_format: SerializationFormat::default(),
            write_mode: WriteMode::default(),
            cleanup_interval: 300,
        }
    }
}

/// A TTL must be finite and convert to a non-zero Duration.
///
/// A zero default would make every `set()` without a TTL a silent no-op.
fn check_ttl(name: &str, seconds: f64) -> Result<()> {
    let in_range = seconds.is_finite() && seconds > 0.0 && seconds <= MAX_TTL_SECONDS;
    if !in_range || Duration::from_secs_f64(seconds).is_zero() {
        return Err(CacheError::Configuration(format!(
            "{} must be positive and at most {} seconds, got {}",
            name, MAX_TTL_SECONDS, seconds
        )));
    }
    Ok(())
}

// == Parsing Helpers ==
fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        CacheError::Configuration(format!("{} has invalid value '{}': {}", name, raw, e))
    })
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => parse_value(name, &raw),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, name: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(CacheError::Configuration(format!(
                "{} must be a boolean, got '{}'",
                name, raw
            ))),
        },
        None => Ok(default),
    }
}
