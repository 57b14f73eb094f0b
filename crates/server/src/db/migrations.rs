//! Schema migrations.
//!
//! Fixed-name infrastructure tables (queue, secrets) come from embedded SQL
//! files; entity tables use configurable names, so they are created from the
//! running configuration.

use crate::config::AppConfig;
use crate::models::errors::BackupError;
use crate::storage::TableStore;
use sqlx::SqlitePool;

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_job_queue", include_str!("../../migrations/001_job_queue.sql")),
    ("002_secrets", include_str!("../../migrations/002_secrets.sql")),
];

/// Run all migrations. Every statement is idempotent, so this is safe to run
/// on every startup.
pub async fn run_migrations(pool: &SqlitePool, config: &AppConfig) -> Result<(), BackupError> {
    tracing::info!("Running database migrations");

    for (name, sql) in MIGRATIONS {
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| BackupError::Storage(format!("migration {} failed: {}", name, e)))?;
        }
    }

    // Entity tables are all key-partitioned stores with the same shape.
    let entity_tables = [
        &config.config_table_name,
        &config.history_table_name,
        &config.policies_table_name,
        &config.audit_table_name,
        &config.users_table_name,
        &config.settings_table_name,
        &config.access_requests_table_name,
    ];
    for table in entity_tables {
        TableStore::new(pool.clone(), table.as_str()).ensure().await?;
    }

    tracing::info!("Database migrations complete");
    Ok(())
}
