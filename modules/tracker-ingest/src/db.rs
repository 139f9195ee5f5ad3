use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Reference schema for the two tables this service writes
pub const SCHEMA_SQL: &str = include_str!("../db/migrations/0001_events_mirror_and_dlq.sql");

/// Initialize a connection pool to the PostgreSQL database
///
/// The pool is shared with the rest of the process; the pipeline acquires a
/// connection per insert and never holds one across a broker round-trip.
///
/// # Connection Limits
/// - Production default: 10 connections
/// - Test mode: Respects `DB_MAX_CONNECTIONS` env var (recommended: 1-2)
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(10);

    let min_connections = std::env::var("DB_MIN_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);

    // Production typically uses 3s for fast-fail behavior
    let acquire_timeout_secs = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Create `events_mirror` and `dlq_events` if they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}
