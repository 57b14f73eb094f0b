//! Key-partitioned table store over SQLite.
//!
//! Every catalog entity lives in a table of shape
//! `(partition_key, row_key, body)` with a composite primary key. Listings
//! within a partition come back in ascending row-key order, which is what the
//! inverted-timestamp row keys rely on: lexicographically ascending iteration
//! is chronologically descending results.

use crate::models::errors::BackupError;
use sqlx::{Row, SqlitePool};

/// One stored row: identity plus a JSON document body.
#[derive(Debug, Clone)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub body: serde_json::Value,
}

/// Handle to a single logical table.
#[derive(Clone)]
pub struct TableStore {
    pool: SqlitePool,
    table: String,
}

impl TableStore {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Create the backing table if it does not exist yet.
    pub async fn ensure(&self) -> Result<(), BackupError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                partition_key TEXT NOT NULL,
                row_key TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (partition_key, row_key)
            )",
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableEntity>, BackupError> {
        let sql = format!(
            "SELECT partition_key, row_key, body FROM {} WHERE partition_key = ? AND row_key = ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(partition_key)
            .bind(row_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::decode_row).transpose()
    }

    /// Insert or replace. Last writer wins; the catalog does not use
    /// optimistic concurrency.
    pub async fn upsert(&self, entity: &TableEntity) -> Result<(), BackupError> {
        let sql = format!(
            "INSERT INTO {} (partition_key, row_key, body) VALUES (?, ?, ?)
             ON CONFLICT (partition_key, row_key) DO UPDATE SET body = excluded.body",
            self.table
        );
        sqlx::query(&sql)
            .bind(&entity.partition_key)
            .bind(&entity.row_key)
            .bind(entity.body.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert, failing if the row already exists.
    pub async fn insert(&self, entity: &TableEntity) -> Result<(), BackupError> {
        let sql = format!(
            "INSERT INTO {} (partition_key, row_key, body) VALUES (?, ?, ?)",
            self.table
        );
        sqlx::query(&sql)
            .bind(&entity.partition_key)
            .bind(&entity.row_key)
            .bind(entity.body.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => BackupError::PolicyViolation(
                    format!("Row '{}' already exists", entity.row_key),
                ),
                _ => BackupError::from(e),
            })?;
        Ok(())
    }

    pub async fn delete(&self, partition_key: &str, row_key: &str) -> Result<bool, BackupError> {
        let sql = format!(
            "DELETE FROM {} WHERE partition_key = ? AND row_key = ?",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(partition_key)
            .bind(row_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All rows in one partition, ascending row-key order.
    pub async fn query_partition(&self, partition_key: &str) -> Result<Vec<TableEntity>, BackupError> {
        let sql = format!(
            "SELECT partition_key, row_key, body FROM {}
             WHERE partition_key = ? ORDER BY row_key ASC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(partition_key)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::decode_row).collect()
    }

    /// All rows whose partition key falls in `[from, to]` (inclusive),
    /// ordered by partition then row key.
    pub async fn query_partition_range(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Vec<TableEntity>, BackupError> {
        let sql = format!(
            "SELECT partition_key, row_key, body FROM {}
             WHERE partition_key >= ? AND partition_key <= ?
             ORDER BY partition_key ASC, row_key ASC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::decode_row).collect()
    }

    pub async fn query_all(&self) -> Result<Vec<TableEntity>, BackupError> {
        let sql = format!(
            "SELECT partition_key, row_key, body FROM {}
             ORDER BY partition_key ASC, row_key ASC",
            self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::decode_row).collect()
    }

    fn decode_row(row: sqlx::sqlite::SqliteRow) -> Result<TableEntity, BackupError> {
        let body_text: String = row.try_get("body")?;
        Ok(TableEntity {
            partition_key: row.try_get("partition_key")?,
            row_key: row.try_get("row_key")?,
            body: serde_json::from_str(&body_text)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_pool;
    use serde_json::json;

    fn entity(partition: &str, row: &str, value: i64) -> TableEntity {
        TableEntity {
            partition_key: partition.to_string(),
            row_key: row.to_string(),
            body: json!({ "value": value }),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let pool = create_test_pool().await;
        let store = TableStore::new(pool, "test_entities");
        store.ensure().await.unwrap();

        store.upsert(&entity("p", "r1", 1)).await.unwrap();
        store.upsert(&entity("p", "r1", 2)).await.unwrap();

        let got = store.get("p", "r1").await.unwrap().unwrap();
        assert_eq!(got.body["value"], 2);
        assert!(store.get("p", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partition_listing_is_row_key_ordered() {
        let pool = create_test_pool().await;
        let store = TableStore::new(pool, "test_entities");
        store.ensure().await.unwrap();

        store.upsert(&entity("p", "b", 2)).await.unwrap();
        store.upsert(&entity("p", "a", 1)).await.unwrap();
        store.upsert(&entity("q", "c", 3)).await.unwrap();

        let rows = store.query_partition("p").await.unwrap();
        let keys: Vec<_> = rows.iter().map(|e| e.row_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn partition_range_is_inclusive() {
        let pool = create_test_pool().await;
        let store = TableStore::new(pool, "test_entities");
        store.ensure().await.unwrap();

        for day in ["2024-01-01", "2024-01-02", "2024-01-03"] {
            store.upsert(&entity(day, "r", 0)).await.unwrap();
        }

        let rows = store
            .query_partition_range("2024-01-01", "2024-01-02")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let pool = create_test_pool().await;
        let store = TableStore::new(pool, "test_entities");
        store.ensure().await.unwrap();

        store.insert(&entity("p", "r", 1)).await.unwrap();
        assert!(store.insert(&entity("p", "r", 2)).await.is_err());
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let pool = create_test_pool().await;
        let store = TableStore::new(pool, "test_entities");
        store.ensure().await.unwrap();

        store.upsert(&entity("p", "r", 1)).await.unwrap();
        assert!(store.delete("p", "r").await.unwrap());
        assert!(!store.delete("p", "r").await.unwrap());
    }
}
