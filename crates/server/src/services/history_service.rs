//! Backup history: the durable record of every execution attempt.
//!
//! The worker is the only writer. Read paths materialize candidates from the
//! partition range implied by the date filter, apply the remaining filters in
//! memory, and sort by `created_at` descending.

use crate::models::backup::{BackupResult, BackupStatus, TriggeredBy};
use crate::models::errors::BackupError;
use crate::models::{BackupTier, EngineType};
use crate::storage::{BlobStore, TableStore};
use crate::utils::format_bytes;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;

/// Filters for the paged history listing.
#[derive(Debug, Default)]
pub struct HistoryFilter {
    pub page: usize,
    pub page_size: usize,
    pub database_id: Option<String>,
    pub database_ids: Option<Vec<String>>,
    pub status: Option<BackupStatus>,
    pub triggered_by: Option<TriggeredBy>,
    pub database_type: Option<EngineType>,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize)]
pub struct BackupStats {
    pub count: usize,
    pub total_size_bytes: u64,
    pub total_size_formatted: String,
}

/// A database whose most recent backups all failed.
#[derive(Debug, Serialize)]
pub struct BackupAlert {
    pub database_id: String,
    pub database_name: String,
    pub database_type: EngineType,
    pub consecutive_failures: usize,
    pub last_failure_at: NaiveDateTime,
    pub last_error: Option<String>,
}

/// Outcome of a cascade delete.
#[derive(Debug, Default, Serialize)]
pub struct DeleteSummary {
    pub deleted_files: usize,
    pub deleted_records: usize,
    pub errors: Vec<String>,
}

pub struct HistoryService {
    store: TableStore,
    blobs: Arc<BlobStore>,
    container: String,
}

impl HistoryService {
    pub fn new(store: TableStore, blobs: Arc<BlobStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            blobs,
            container: container.into(),
        }
    }

    /// Upsert a result. The row key is derived from the fixed `created_at`,
    /// so lifecycle rewrites land on the same row.
    pub async fn save(&self, result: &BackupResult) -> Result<(), BackupError> {
        self.store.upsert(&result.to_entity()?).await
    }

    async fn load_range(
        &self,
        start_date: Option<NaiveDateTime>,
        end_date: Option<NaiveDateTime>,
    ) -> Result<Vec<BackupResult>, BackupError> {
        let entities = match (start_date, end_date) {
            (Some(from), Some(to)) => {
                self.store
                    .query_partition_range(
                        &from.format("%Y-%m-%d").to_string(),
                        &to.format("%Y-%m-%d").to_string(),
                    )
                    .await?
            }
            (Some(from), None) => {
                self.store
                    .query_partition_range(&from.format("%Y-%m-%d").to_string(), "9999-12-31")
                    .await?
            }
            (None, Some(to)) => {
                self.store
                    .query_partition_range("0000-01-01", &to.format("%Y-%m-%d").to_string())
                    .await?
            }
            (None, None) => self.store.query_all().await?,
        };

        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            match BackupResult::from_entity(&entity) {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!("Skipping malformed backup entity {}: {}", entity.row_key, e)
                }
            }
        }
        Ok(results)
    }

    /// Paged listing sorted by `created_at` descending. Returns the page,
    /// the total matching count, and whether more pages follow.
    pub async fn list_paged(
        &self,
        filter: &HistoryFilter,
    ) -> Result<(Vec<BackupResult>, usize, bool), BackupError> {
        let mut results = self.load_range(filter.start_date, filter.end_date).await?;

        // The partition keys are date-only; apply the precise bounds here.
        if let Some(start) = filter.start_date {
            results.retain(|r| r.created_at >= start);
        }
        if let Some(end) = filter.end_date {
            results.retain(|r| r.created_at <= end);
        }
        if let Some(database_id) = &filter.database_id {
            results.retain(|r| &r.database_id == database_id);
        }
        if let Some(database_ids) = &filter.database_ids {
            results.retain(|r| database_ids.contains(&r.database_id));
        }
        if let Some(status) = filter.status {
            results.retain(|r| r.status == status);
        }
        if let Some(triggered_by) = filter.triggered_by {
            results.retain(|r| r.triggered_by == triggered_by);
        }
        if let Some(database_type) = filter.database_type {
            results.retain(|r| r.database_type == database_type);
        }

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total_count = results.len();
        let page = filter.page.max(1);
        let page_size = if filter.page_size == 0 { 25 } else { filter.page_size };
        let start_idx = (page - 1) * page_size;
        let end_idx = (start_idx + page_size).min(total_count);
        let page_results = if start_idx < total_count {
            results[start_idx..end_idx].to_vec()
        } else {
            Vec::new()
        };
        let has_more = end_idx < total_count;

        Ok((page_results, total_count, has_more))
    }

    /// Most recent completed backup for a database in a tier. Legacy records
    /// without a tier count as daily.
    pub async fn last_completed(
        &self,
        database_id: &str,
        tier: BackupTier,
    ) -> Result<Option<BackupResult>, BackupError> {
        let mut results = self.load_range(None, None).await?;
        results.retain(|r| {
            r.database_id == database_id
                && r.status == BackupStatus::Completed
                && r.effective_tier() == tier
        });
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results.into_iter().next())
    }

    /// All completed results for one database, newest first.
    pub async fn completed_for_database(
        &self,
        database_id: &str,
    ) -> Result<Vec<BackupResult>, BackupError> {
        let mut results = self.load_range(None, None).await?;
        results.retain(|r| r.database_id == database_id && r.status == BackupStatus::Completed);
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    pub async fn stats_for_database(&self, database_id: &str) -> Result<BackupStats, BackupError> {
        let mut results = self.load_range(None, None).await?;
        results.retain(|r| r.database_id == database_id);
        let total: u64 = results.iter().filter_map(|r| r.file_size_bytes).sum();
        Ok(BackupStats {
            count: results.len(),
            total_size_bytes: total,
            total_size_formatted: format_bytes(total),
        })
    }

    /// Databases whose last `threshold` results all failed, newest first.
    pub async fn alerts(&self, threshold: usize) -> Result<Vec<BackupAlert>, BackupError> {
        let mut results = self.load_range(None, None).await?;
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut by_database: std::collections::HashMap<String, Vec<&BackupResult>> =
            std::collections::HashMap::new();
        for result in &results {
            by_database
                .entry(result.database_id.clone())
                .or_default()
                .push(result);
        }

        let mut alerts = Vec::new();
        for (database_id, history) in by_database {
            let recent = &history[..history.len().min(threshold)];
            if recent.len() >= threshold && recent.iter().all(|r| r.status == BackupStatus::Failed) {
                let last = recent[0];
                alerts.push(BackupAlert {
                    database_id,
                    database_name: last.database_name.clone(),
                    database_type: last.database_type,
                    consecutive_failures: recent.len(),
                    last_failure_at: last.created_at,
                    last_error: last.error_message.clone(),
                });
            }
        }
        alerts.sort_by(|a, b| b.last_failure_at.cmp(&a.last_failure_at));
        Ok(alerts)
    }

    /// Look a result up by id alone; the partition is not known to callers.
    pub async fn find_by_id(&self, backup_id: &str) -> Result<Option<BackupResult>, BackupError> {
        for entity in self.store.query_all().await? {
            if crate::utils::time::id_from_row_key(&entity.row_key) == backup_id {
                return Ok(Some(BackupResult::from_entity(&entity)?));
            }
        }
        Ok(None)
    }

    /// Delete the history record only. Returns the record when found.
    pub async fn delete_record(&self, backup_id: &str) -> Result<Option<BackupResult>, BackupError> {
        let Some(result) = self.find_by_id(backup_id).await? else {
            return Ok(None);
        };
        self.store
            .delete(&result.partition_key(), &result.row_key())
            .await?;
        Ok(Some(result))
    }

    /// Delete a record and its blob. The blob is removed first; a half-done
    /// delete is finished by the next retention pass.
    pub async fn delete_with_blob(&self, result: &BackupResult) -> Result<(), BackupError> {
        self.delete_blob_for(result)?;
        self.store
            .delete(&result.partition_key(), &result.row_key())
            .await?;
        Ok(())
    }

    /// Delete a blob (and any records pointing at it) by blob name.
    pub async fn delete_by_blob_name(&self, blob_name: &str) -> Result<DeleteSummary, BackupError> {
        let mut summary = DeleteSummary::default();

        if self.blobs.delete(&self.container, blob_name)? {
            summary.deleted_files += 1;
        }

        for result in self.load_range(None, None).await? {
            if result.blob_name.as_deref() == Some(blob_name) {
                match self
                    .store
                    .delete(&result.partition_key(), &result.row_key())
                    .await
                {
                    Ok(true) => summary.deleted_records += 1,
                    Ok(false) => {}
                    Err(e) => summary
                        .errors
                        .push(format!("Failed to delete record {}: {}", result.id, e)),
                }
            }
        }
        Ok(summary)
    }

    /// Bulk blob delete used by the UI's multi-select.
    pub async fn delete_bulk(&self, blob_names: &[String]) -> Result<DeleteSummary, BackupError> {
        let mut summary = DeleteSummary::default();
        for blob_name in blob_names {
            match self.delete_by_blob_name(blob_name).await {
                Ok(one) => {
                    summary.deleted_files += one.deleted_files;
                    summary.deleted_records += one.deleted_records;
                    summary.errors.extend(one.errors);
                }
                Err(e) => summary.errors.push(format!("{}: {}", blob_name, e)),
            }
        }
        Ok(summary)
    }

    /// Remove every blob and history record for one database. Used by the
    /// catalog's cascade delete.
    pub async fn delete_all_for_database(
        &self,
        database_id: &str,
    ) -> Result<DeleteSummary, BackupError> {
        let mut summary = DeleteSummary::default();
        let mut results = self.load_range(None, None).await?;
        results.retain(|r| r.database_id == database_id);

        for result in results {
            if result.blob_name.is_some() {
                match self.delete_blob_for(&result) {
                    Ok(true) => summary.deleted_files += 1,
                    Ok(false) => {}
                    Err(e) => summary
                        .errors
                        .push(format!("Failed to delete blob for {}: {}", result.id, e)),
                }
            }
            match self
                .store
                .delete(&result.partition_key(), &result.row_key())
                .await
            {
                Ok(true) => summary.deleted_records += 1,
                Ok(false) => {}
                Err(e) => summary
                    .errors
                    .push(format!("Failed to delete record {}: {}", result.id, e)),
            }
        }

        tracing::info!(
            "Deleted {} files and {} records for database {}",
            summary.deleted_files,
            summary.deleted_records,
            database_id
        );
        Ok(summary)
    }

    /// Delete the blob a record points at. Prefers the stored URL so records
    /// whose database used a custom destination container resolve correctly.
    pub fn delete_blob_for(&self, result: &BackupResult) -> Result<bool, BackupError> {
        if let Some(url) = &result.blob_url {
            return self.blobs.delete_by_url(url);
        }
        if let Some(blob_name) = &result.blob_name {
            return self.blobs.delete(&self.container, blob_name);
        }
        Ok(false)
    }
}
