// Database access layer: pool construction and schema migrations

pub mod migrations;

use crate::models::errors::BackupError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Initialize the SQLite connection pool, creating the database file on
/// first start.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool, BackupError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| BackupError::Storage(format!("invalid DATABASE_URL: {}", e)))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
