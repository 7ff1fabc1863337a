//! Redis Remote Tier
//!
//! `RemoteCache` over a multiplexed `redis::aio::ConnectionManager`.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::config::RemoteConfig;
use crate::error::{CacheError, Result};
use crate::keys::{DIGEST_HEX_LEN, IDENTIFIER_HEX_LEN};
use crate::remote::{RemoteCache, RemoteEntry};

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 500;

// == Redis Cache ==
/// Redis-backed L2.
///
/// The connection manager multiplexes every caller over one reconnecting
/// connection, so no caller ever owns it exclusively. Dropping an in-flight
/// future abandons only that request.
pub struct RedisCache {
    connection: RwLock<Option<ConnectionManager>>,
    key_prefix: String,
}

impl RedisCache {
    /// Connects and verifies the server answers PING within the configured
    /// timeout.
    pub async fn connect(config: &RemoteConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;

        let manager = tokio::time::timeout(config.timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::TierUnavailable(format!(
                    "connecting to {}:{} timed out",
                    config.host, config.port
                ))
            })??;

        let cache = Self {
            connection: RwLock::new(Some(manager)),
            key_prefix: config.key_prefix.clone(),
        };

        tokio::time::timeout(config.timeout(), cache.ping())
            .await
            .map_err(|_| CacheError::TierUnavailable("PING timed out".to_string()))??;

        info!(host = %config.host, port = config.port, prefix = %cache.key_prefix, "Redis tier connected");
        Ok(cache)
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| CacheError::TierUnavailable("redis connection closed".to_string()))
    }

    fn remote_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// SCAN MATCH pattern for exactly one namespace.
    ///
    /// The digest is a fixed run of hex characters, so `?` repeated
    /// `DIGEST_HEX_LEN` times cannot match keys of a longer namespace that
    /// merely shares this one as a prefix.
    fn namespace_pattern(&self, namespace: &str) -> String {
        format!(
            "{}{}:{}",
            escape_glob(&self.key_prefix),
            escape_glob(namespace),
            "?".repeat(DIGEST_HEX_LEN)
        )
    }

    /// SCAN MATCH pattern for every payload variant of one identifier.
    fn identifier_pattern(&self, namespace: &str, identifier_digest: &str) -> String {
        format!(
            "{}{}:{}{}",
            escape_glob(&self.key_prefix),
            escape_glob(namespace),
            escape_glob(identifier_digest),
            "?".repeat(DIGEST_HEX_LEN - IDENTIFIER_HEX_LEN)
        )
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let mut conn = self.connection()?;
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern, removed, "Redis pattern delete complete");
        Ok(removed)
    }
}

#[async_trait]
impl RemoteCache for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>> {
        let mut conn = self.connection()?;
        let key = self.remote_key(key);

        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .get(&key)
            .pttl(&key)
            .query_async(&mut conn)
            .await?;

        Ok(value.map(|value| RemoteEntry {
            value,
            // -1 = no expiry, -2 = vanished between the two commands
            ttl_remaining: u64::try_from(pttl)
                .ok()
                .map(Duration::from_millis),
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let _: () = conn.pset_ex(self.remote_key(key), value, millis).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let removed: usize = conn.del(self.remote_key(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<usize> {
        let pattern = self.namespace_pattern(namespace);
        self.delete_matching(&pattern).await
    }

    async fn delete_identifier(&self, namespace: &str, identifier_digest: &str) -> Result<usize> {
        let pattern = self.identifier_pattern(namespace, identifier_digest);
        self.delete_matching(&pattern).await
    }

    async fn clear(&self) -> Result<usize> {
        let pattern = format!("{}*", escape_glob(&self.key_prefix));
        self.delete_matching(&pattern).await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.connection.write().take().is_some() {
            info!("Redis tier connection released");
        }
    }
}

/// Escapes Redis glob metacharacters.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
