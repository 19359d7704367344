//! Postgres connection pool for the form store.

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DatabaseConfig;

/// Open the pool. A request that waits longer than `acquire_timeout_seconds`
/// for a connection fails instead of stalling a prediction batch.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        acquire_timeout_s = config.acquire_timeout_seconds,
        "Form store pool ready"
    );
    Ok(pool)
}

/// Server version plus the number of stored forms, as one status line.
pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let (version, forms): (String, i64) =
        sqlx::query_as("SELECT version(), (SELECT COUNT(*) FROM forms)")
            .fetch_one(pool)
            .await?;

    let server = version.split(" on ").next().unwrap_or(&version);
    Ok(format!("{}, {} forms", server, forms))
}
