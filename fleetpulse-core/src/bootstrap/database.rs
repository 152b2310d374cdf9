//! Database initialization

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::repository::{MemoryTelemetryStore, PgTelemetryStore, TelemetryStore};
use crate::Config;

/// Initialize database connection pool
///
/// Note: Migrations should be run separately by the binary crate.
pub async fn init_database(config: &Config) -> Result<PgPool> {
    info!("Connecting to database");

    let pool: PgPool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_seconds))
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            anyhow::anyhow!("Database connection failed: {e}")
        })?;

    info!("Database connected successfully");

    Ok(pool)
}

/// Pick the telemetry store for this process
///
/// Returns the pool alongside the store so the caller can run migrations and
/// close it on shutdown. An empty database URL selects the in-memory store.
pub async fn init_store(config: &Config) -> Result<(Arc<dyn TelemetryStore>, Option<PgPool>)> {
    if config.database.url.is_empty() {
        warn!("Database URL not configured, readings are kept in memory only");
        return Ok((Arc::new(MemoryTelemetryStore::new()), None));
    }

    let pool = init_database(config).await?;
    let store: Arc<dyn TelemetryStore> = Arc::new(PgTelemetryStore::new(pool.clone()));
    Ok((store, Some(pool)))
}
