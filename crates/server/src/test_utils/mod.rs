//! Test utilities shared across service and storage tests.

use crate::config::AppConfig;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};

/// Create an in-memory SQLite pool with the full schema applied.
///
/// A single connection keeps every query in the test on the same in-memory
/// database.
pub async fn create_test_db() -> Result<Pool<Sqlite>, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    crate::db::migrations::run_migrations(&pool, &AppConfig::defaults())
        .await
        .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;

    Ok(pool)
}

/// Infallible variant for the common test setup path.
pub async fn create_test_pool() -> SqlitePool {
    create_test_db().await.expect("Failed to create test pool")
}

/// Test configuration pointing the blob store at a throwaway directory.
pub fn test_config(blob_root: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::defaults();
    config.blob_root = blob_root.display().to_string();
    config
}
