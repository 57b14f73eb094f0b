//! Durable at-least-once job queue over SQLite.
//!
//! Mirrors cloud queue semantics: a received message becomes invisible for a
//! visibility timeout and carries a pop receipt; deleting requires the
//! current receipt. A message that is not deleted in time reappears with an
//! incremented dequeue count. Retry timing is owned entirely by visibility
//! expiry; there is no separate retry table.

use crate::models::errors::BackupError;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::time::Duration;

/// A message leased from the queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub content: String,
    pub dequeue_count: u32,
    pub pop_receipt: String,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    queue: String,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Enqueue a message, immediately visible. Returns the message id.
    pub async fn enqueue(&self, content: &str) -> Result<String, BackupError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO job_queue (id, queue, content, enqueued_at, visible_at, dequeue_count, pop_receipt)
             VALUES (?, ?, ?, ?, ?, 0, '')",
        )
        .bind(&id)
        .bind(&self.queue)
        .bind(content)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| BackupError::Queue(e.to_string()))?;
        Ok(id)
    }

    /// Lease up to `max_messages` visible messages for `visibility_timeout`.
    ///
    /// Each lease atomically bumps the dequeue count, rotates the pop
    /// receipt, and pushes the visibility horizon, so two workers can never
    /// hold the same message at once.
    pub async fn receive(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, BackupError> {
        let mut messages = Vec::new();
        for _ in 0..max_messages {
            let now = Utc::now().timestamp();
            let visible_at = now + visibility_timeout.as_secs() as i64;
            let pop_receipt = uuid::Uuid::new_v4().to_string();

            let row = sqlx::query(
                "UPDATE job_queue
                 SET visible_at = ?, dequeue_count = dequeue_count + 1, pop_receipt = ?
                 WHERE id = (
                     SELECT id FROM job_queue
                     WHERE queue = ? AND visible_at <= ?
                     ORDER BY enqueued_at ASC, rowid ASC
                     LIMIT 1
                 )
                 RETURNING id, content, dequeue_count, pop_receipt",
            )
            .bind(visible_at)
            .bind(&pop_receipt)
            .bind(&self.queue)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BackupError::Queue(e.to_string()))?;

            match row {
                Some(row) => messages.push(QueueMessage {
                    id: row.try_get("id").map_err(|e| BackupError::Queue(e.to_string()))?,
                    content: row
                        .try_get("content")
                        .map_err(|e| BackupError::Queue(e.to_string()))?,
                    dequeue_count: row
                        .try_get::<i64, _>("dequeue_count")
                        .map_err(|e| BackupError::Queue(e.to_string()))? as u32,
                    pop_receipt: row
                        .try_get("pop_receipt")
                        .map_err(|e| BackupError::Queue(e.to_string()))?,
                }),
                None => break,
            }
        }
        Ok(messages)
    }

    /// Delete a leased message. Fails (returns false) when the receipt is
    /// stale, i.e. the lease expired and someone else holds the message.
    pub async fn delete(&self, id: &str, pop_receipt: &str) -> Result<bool, BackupError> {
        let result = sqlx::query("DELETE FROM job_queue WHERE id = ? AND pop_receipt = ?")
            .bind(id)
            .bind(pop_receipt)
            .execute(&self.pool)
            .await
            .map_err(|e| BackupError::Queue(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Messages currently in the queue, leased or not. Used by health checks.
    pub async fn depth(&self) -> Result<u64, BackupError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE queue = ?")
            .bind(&self.queue)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BackupError::Queue(e.to_string()))?;
        Ok(count as u64)
    }
}
