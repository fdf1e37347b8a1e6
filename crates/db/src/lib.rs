//! Osprey persistence layer: connection pool, migrations, models, and
//! repositories for jobs, schedules, queue messages, and the change-event
//! log.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Default maximum pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Default connection-acquisition timeout in seconds.
///
/// Exceeding this surfaces `sqlx::Error::PoolTimedOut`, which the API maps
/// to `ResourceExhausted` so callers back off instead of blocking.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Create a bounded connection pool with an acquisition timeout.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Apply embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
