//! Backup jobs (queue messages) and backup results (history records).

use crate::models::engine::EngineType;
use crate::models::errors::BackupError;
use crate::models::policy::BackupTier;
use crate::storage::TableEntity;
use crate::utils::time::{id_from_row_key, inverted_ticks_row_key};
use crate::utils::now_utc;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a backup execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// What put a job on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Scheduler,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduler => "scheduler",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "scheduler" => Some(Self::Scheduler),
            _ => None,
        }
    }
}

/// A transient work item describing one backup to execute.
///
/// Serialized as UTF-8 JSON, one job per queue message. Passwords never ride
/// on the queue; the worker resolves `password_secret_name` at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub database_id: String,
    pub database_name: String,
    pub database_type: EngineType,
    pub host: String,
    pub port: u16,
    pub target_database: String,
    pub username: String,
    #[serde(default)]
    pub password_secret_name: Option<String>,
    #[serde(default)]
    pub compression: bool,
    #[serde(default)]
    pub backup_destination: Option<String>,
    pub triggered_by: TriggeredBy,
    /// None for manual jobs; retention maps them into the daily bucket.
    #[serde(default)]
    pub tier: Option<BackupTier>,
    #[serde(default)]
    pub scheduled_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl BackupJob {
    pub fn to_queue_message(&self) -> Result<String, BackupError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_queue_message(message: &str) -> Result<Self, BackupError> {
        Ok(serde_json::from_str(message)?)
    }
}

/// Durable record of one backup execution attempt.
///
/// Partition key is the `YYYY-MM-DD` of `created_at`; the row key is the
/// inverted-tick encoding so ascending row-key scans read newest-first. The
/// same record is upserted across its lifecycle (pending, in_progress,
/// terminal) and `created_at` is fixed at pending time so the row key never
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupResult {
    pub id: String,
    pub job_id: String,
    pub database_id: String,
    pub database_name: String,
    pub database_type: EngineType,
    pub status: BackupStatus,
    #[serde(default)]
    pub started_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub blob_name: Option<String>,
    #[serde(default)]
    pub blob_url: Option<String>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_details: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub triggered_by: TriggeredBy,
    #[serde(default)]
    pub tier: Option<BackupTier>,
    pub created_at: NaiveDateTime,
}

impl BackupResult {
    pub fn for_job(job: &BackupJob) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            database_id: job.database_id.clone(),
            database_name: job.database_name.clone(),
            database_type: job.database_type,
            status: BackupStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            blob_name: None,
            blob_url: None,
            file_size_bytes: None,
            file_format: None,
            error_message: None,
            error_details: None,
            retry_count: 0,
            triggered_by: job.triggered_by,
            tier: job.tier,
            created_at: now_utc(),
        }
    }

    pub fn mark_started(&mut self) {
        self.status = BackupStatus::InProgress;
        self.started_at = Some(now_utc());
    }

    pub fn mark_completed(
        &mut self,
        blob_name: String,
        blob_url: String,
        file_size_bytes: u64,
        file_format: String,
    ) {
        self.status = BackupStatus::Completed;
        self.completed_at = Some(now_utc());
        self.blob_name = Some(blob_name);
        self.blob_url = Some(blob_url);
        self.file_size_bytes = Some(file_size_bytes);
        self.file_format = Some(file_format);
        self.update_duration();
    }

    pub fn mark_failed(&mut self, error_message: String, error_details: Option<String>) {
        self.status = BackupStatus::Failed;
        self.completed_at = Some(now_utc());
        self.error_message = Some(error_message);
        self.error_details = error_details;
        self.update_duration();
    }

    pub fn mark_cancelled(&mut self) {
        self.status = BackupStatus::Cancelled;
        self.completed_at = Some(now_utc());
        self.update_duration();
    }

    fn update_duration(&mut self) {
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            let millis = (completed - started).num_milliseconds();
            self.duration_seconds = Some(millis as f64 / 1000.0);
        }
    }

    /// The tier used for retention bucketing: tier-less legacy and manual
    /// records count as daily.
    pub fn effective_tier(&self) -> BackupTier {
        self.tier.unwrap_or(BackupTier::Daily)
    }

    pub fn partition_key(&self) -> String {
        self.created_at.format("%Y-%m-%d").to_string()
    }

    pub fn row_key(&self) -> String {
        inverted_ticks_row_key(self.created_at, &self.id)
    }

    pub fn to_entity(&self) -> Result<TableEntity, BackupError> {
        Ok(TableEntity {
            partition_key: self.partition_key(),
            row_key: self.row_key(),
            body: serde_json::to_value(self)?,
        })
    }

    pub fn from_entity(entity: &TableEntity) -> Result<Self, BackupError> {
        let mut result: Self = serde_json::from_value(entity.body.clone())?;
        result.id = id_from_row_key(&entity.row_key).to_string();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn job() -> BackupJob {
        BackupJob {
            id: "job-1".into(),
            database_id: "db-1".into(),
            database_name: "orders".into(),
            database_type: EngineType::Mysql,
            host: "db.internal".into(),
            port: 3306,
            target_database: "orders_prod".into(),
            username: "backup".into(),
            password_secret_name: Some("database-db-1".into()),
            compression: true,
            backup_destination: None,
            triggered_by: TriggeredBy::Scheduler,
            tier: Some(BackupTier::Hourly),
            scheduled_at: Some(now_utc()),
            created_at: now_utc(),
        }
    }

    #[test]
    fn queue_message_round_trips() {
        let original = job();
        let message = original.to_queue_message().unwrap();
        let restored = BackupJob::from_queue_message(&message).unwrap();
        assert_eq!(restored.id, original.id);
        assert_eq!(restored.database_type, EngineType::Mysql);
        assert_eq!(restored.tier, Some(BackupTier::Hourly));
        assert_eq!(restored.triggered_by, TriggeredBy::Scheduler);
        assert_eq!(restored.target_database, "orders_prod");
    }

    #[test]
    fn result_entity_round_trips_with_row_key_id() {
        let mut result = BackupResult::for_job(&job());
        result.created_at = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        result.mark_started();
        result.mark_completed(
            "mysql/db-1/20240601_120003.sql.gz".into(),
            "file:///backups/mysql/db-1/20240601_120003.sql.gz".into(),
            1024,
            "sql.gz".into(),
        );

        let entity = result.to_entity().unwrap();
        assert_eq!(entity.partition_key, "2024-06-01");
        assert!(entity.row_key.ends_with(&result.id));

        let restored = BackupResult::from_entity(&entity).unwrap();
        assert_eq!(restored.id, result.id);
        assert_eq!(restored.status, BackupStatus::Completed);
        assert_eq!(restored.file_size_bytes, Some(1024));
        assert_eq!(restored.created_at, result.created_at);
    }

    #[test]
    fn row_key_is_stable_across_lifecycle_writes() {
        let mut result = BackupResult::for_job(&job());
        let key_at_pending = result.row_key();
        result.mark_started();
        result.mark_failed("Access denied".into(), Some("BackupExecutionError".into()));
        assert_eq!(result.row_key(), key_at_pending);
    }

    #[test]
    fn manual_and_legacy_results_bucket_as_daily() {
        let mut result = BackupResult::for_job(&job());
        result.tier = None;
        assert_eq!(result.effective_tier(), BackupTier::Daily);
        result.tier = Some(BackupTier::Yearly);
        assert_eq!(result.effective_tier(), BackupTier::Yearly);
    }

    #[test]
    fn duration_is_derived_from_start_and_completion() {
        let mut result = BackupResult::for_job(&job());
        result.started_at = Some(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        );
        result.completed_at = Some(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(12, 1, 30)
                .unwrap(),
        );
        result.update_duration();
        assert_eq!(result.duration_seconds, Some(90.0));
    }
}
