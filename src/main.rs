//! Tiered Cache smoke check
//!
//! Loads configuration from the environment, brings a manager up, runs one
//! round trip through it and prints the resulting statistics as JSON.

use anyhow::Context;
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiered_cache::{CacheConfig, CacheLookup, CacheManager};

const SMOKE_NAMESPACE: &str = "smoke";

/// Main entry point for the cache smoke check.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from `CACHE_*` environment variables
/// 3. Initialize the manager (Redis is optional and may be unreachable)
/// 4. Store and read back a smoke value
/// 5. Print a stats snapshot, then clean up
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiered_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env().context("loading cache configuration")?;
    info!(
        memory = config.enable_memory_cache,
        redis = config.enable_redis_cache,
        max_entries = config.memory_max_size,
        default_ttl_secs = config.default_ttl_seconds,
        "Configuration loaded"
    );

    let manager = CacheManager::new(config);
    manager
        .initialize()
        .await
        .context("initializing cache manager")?;

    tokio::select! {
        result = smoke_check(&manager) => {
            if let Err(e) = &result {
                warn!(error = %e, "Smoke check failed");
            }
            manager.cleanup().await;
            result
        }
        _ = shutdown_signal() => {
            manager.cleanup().await;
            Ok(())
        }
    }
}

async fn smoke_check(manager: &CacheManager) -> anyhow::Result<()> {
    let payload = json!({ "smoke": true, "pid": std::process::id() });
    let value = json!({ "status": "ok", "written_at": chrono::Utc::now() });

    let key = manager
        .set(SMOKE_NAMESPACE, "round_trip", &payload, &value, None)
        .await?;

    match manager
        .get::<serde_json::Value, _>(SMOKE_NAMESPACE, "round_trip", &payload)
        .await?
    {
        CacheLookup::Hit { tier, .. } => info!(key = %key, %tier, "Smoke round trip succeeded"),
        CacheLookup::Miss => warn!(key = %key, "Smoke value was not readable after set"),
    }

    let stats = manager.get_stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
