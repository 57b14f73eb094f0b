//! Immutable audit log entries.

use crate::models::errors::BackupError;
use crate::storage::TableEntity;
use crate::utils::time::{id_from_row_key, inverted_micros_row_key};
use crate::utils::now_utc;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Actions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BackupCompleted,
    BackupFailed,
    BackupDeleted,
    BackupDeletedBulk,
    BackupDeletedRetention,
    BackupTriggered,
    DatabaseCreated,
    DatabaseUpdated,
    DatabaseDeleted,
    DatabaseTestConnection,
    EngineCreated,
    EngineUpdated,
    EngineDeleted,
    EngineDiscovery,
    PolicyCreated,
    PolicyUpdated,
    PolicyDeleted,
    UserCreated,
    UserUpdated,
    UserDeleted,
    SettingsUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResourceType {
    Backup,
    Database,
    Engine,
    Policy,
    User,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failed,
}

/// One audit entry.
///
/// Partition key is the `YYYYMM` of the timestamp; the row key is the
/// inverted-microsecond encoding, so queries by month iterate newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub timestamp: NaiveDateTime,
    /// User id, or "system" for scheduler/worker/retention actions.
    pub user_id: String,
    pub user_email: String,
    pub action: AuditAction,
    pub resource_type: AuditResourceType,
    pub resource_id: String,
    /// Kept even after the resource itself is deleted.
    pub resource_name: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    pub status: AuditStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl AuditLog {
    pub fn system(
        action: AuditAction,
        resource_type: AuditResourceType,
        resource_id: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_utc(),
            user_id: "system".to_string(),
            user_email: "system".to_string(),
            action,
            resource_type,
            resource_id: resource_id.into(),
            resource_name: resource_name.into(),
            details: None,
            status: AuditStatus::Success,
            error_message: None,
            ip_address: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.status = AuditStatus::Failed;
        self.error_message = Some(error_message.into());
        self
    }

    pub fn partition_key(&self) -> String {
        self.timestamp.format("%Y%m").to_string()
    }

    pub fn row_key(&self) -> String {
        inverted_micros_row_key(self.timestamp, &self.id)
    }

    pub fn to_entity(&self) -> Result<TableEntity, BackupError> {
        Ok(TableEntity {
            partition_key: self.partition_key(),
            row_key: self.row_key(),
            body: serde_json::to_value(self)?,
        })
    }

    pub fn from_entity(entity: &TableEntity) -> Result<Self, BackupError> {
        let mut log: Self = serde_json::from_value(entity.body.clone())?;
        log.id = id_from_row_key(&entity.row_key).to_string();
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn audit_entity_round_trips() {
        let mut entry = AuditLog::system(
            AuditAction::BackupDeletedRetention,
            AuditResourceType::Backup,
            "backup-1",
            "orders",
        )
        .with_details(serde_json::json!({ "tier": "daily", "keep_count": 7 }));
        entry.timestamp = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();

        let entity = entry.to_entity().unwrap();
        assert_eq!(entity.partition_key, "202406");

        let restored = AuditLog::from_entity(&entity).unwrap();
        assert_eq!(restored.id, entry.id);
        assert_eq!(restored.action, AuditAction::BackupDeletedRetention);
        assert_eq!(restored.details.unwrap()["tier"], "daily");
    }

    #[test]
    fn newer_entries_sort_first_within_a_month() {
        let mut first = AuditLog::system(
            AuditAction::BackupCompleted,
            AuditResourceType::Backup,
            "a",
            "a",
        );
        let mut second = first.clone();
        first.timestamp = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        second.timestamp = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();
        assert!(second.row_key() < first.row_key());
    }
}
