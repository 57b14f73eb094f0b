//! Audit log service.
//!
//! Appends are fire-and-forget: an audit failure must never fail the
//! operation it describes, so errors are logged and swallowed here.

use crate::models::audit::{AuditAction, AuditLog, AuditResourceType, AuditStatus};
use crate::models::errors::BackupError;
use crate::storage::TableStore;
use chrono::NaiveDateTime;

#[derive(Debug, Default)]
pub struct AuditFilter {
    pub page: usize,
    pub page_size: usize,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<AuditResourceType>,
    pub status: Option<AuditStatus>,
}

pub struct AuditService {
    store: TableStore,
}

impl AuditService {
    pub fn new(store: TableStore) -> Self {
        Self { store }
    }

    /// Append an entry. Never fails the caller.
    pub async fn append(&self, entry: AuditLog) {
        let entity = match entry.to_entity() {
            Ok(entity) => entity,
            Err(e) => {
                tracing::error!("Failed to encode audit entry {}: {}", entry.id, e);
                return;
            }
        };
        if let Err(e) = self.store.upsert(&entity).await {
            tracing::error!("Failed to write audit entry {}: {}", entry.id, e);
        }
    }

    /// Paged listing, newest first. Month partitions bound the scan when a
    /// date range is given.
    pub async fn list(
        &self,
        filter: &AuditFilter,
    ) -> Result<(Vec<AuditLog>, usize, bool), BackupError> {
        let entities = match (filter.start_date, filter.end_date) {
            (Some(from), Some(to)) => {
                self.store
                    .query_partition_range(
                        &from.format("%Y%m").to_string(),
                        &to.format("%Y%m").to_string(),
                    )
                    .await?
            }
            (Some(from), None) => {
                self.store
                    .query_partition_range(&from.format("%Y%m").to_string(), "999912")
                    .await?
            }
            (None, Some(to)) => {
                self.store
                    .query_partition_range("000001", &to.format("%Y%m").to_string())
                    .await?
            }
            (None, None) => self.store.query_all().await?,
        };

        let mut entries = Vec::with_capacity(entities.len());
        for entity in entities {
            match AuditLog::from_entity(&entity) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Skipping malformed audit entity {}: {}", entity.row_key, e)
                }
            }
        }

        if let Some(start) = filter.start_date {
            entries.retain(|e| e.timestamp >= start);
        }
        if let Some(end) = filter.end_date {
            entries.retain(|e| e.timestamp <= end);
        }
        if let Some(user_id) = &filter.user_id {
            entries.retain(|e| &e.user_id == user_id);
        }
        if let Some(action) = filter.action {
            entries.retain(|e| e.action == action);
        }
        if let Some(resource_type) = filter.resource_type {
            entries.retain(|e| e.resource_type == resource_type);
        }
        if let Some(status) = filter.status {
            entries.retain(|e| e.status == status);
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total_count = entries.len();
        let page = filter.page.max(1);
        let page_size = if filter.page_size == 0 { 50 } else { filter.page_size };
        let start_idx = (page - 1) * page_size;
        let end_idx = (start_idx + page_size).min(total_count);
        let page_entries = if start_idx < total_count {
            entries[start_idx..end_idx].to_vec()
        } else {
            Vec::new()
        };
        let has_more = end_idx < total_count;

        Ok((page_entries, total_count, has_more))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_pool;
    use chrono::NaiveDate;

    async fn service() -> AuditService {
        let pool = create_test_pool().await;
        AuditService::new(TableStore::new(pool, "auditlogs"))
    }

    fn entry(action: AuditAction, day: u32, hour: u32) -> AuditLog {
        let mut entry = AuditLog::system(action, AuditResourceType::Backup, "r", "resource");
        entry.timestamp = NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        entry
    }

    #[tokio::test]
    async fn listing_is_newest_first_with_filters() {
        let service = service().await;
        service.append(entry(AuditAction::BackupCompleted, 1, 8)).await;
        service.append(entry(AuditAction::BackupFailed, 2, 8)).await;
        service.append(entry(AuditAction::PolicyDeleted, 3, 8)).await;

        let (all, total, has_more) = service.list(&AuditFilter::default()).await.unwrap();
        assert_eq!(total, 3);
        assert!(!has_more);
        assert_eq!(all[0].action, AuditAction::PolicyDeleted);
        assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let (only_failed, _, _) = service
            .list(&AuditFilter {
                action: Some(AuditAction::BackupFailed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_failed.len(), 1);

        let (ranged, _, _) = service
            .list(&AuditFilter {
                start_date: NaiveDate::from_ymd_opt(2024, 6, 2)
                    .unwrap()
                    .and_hms_opt(0, 0, 0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);
    }

    #[tokio::test]
    async fn append_never_panics_on_listing_later() {
        let service = service().await;
        let failed = entry(AuditAction::BackupFailed, 4, 9).failed("Access denied");
        service.append(failed).await;

        let (entries, _, _) = service
            .list(&AuditFilter {
                status: Some(AuditStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error_message.as_deref(), Some("Access denied"));
    }
}
