//! Application settings singleton.

use crate::models::errors::BackupError;
use crate::storage::TableEntity;
use crate::utils::now_utc;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const SETTINGS_PARTITION: &str = "settings";
pub const SETTINGS_ROW: &str = "app";

fn default_policy_id() -> String {
    "production-standard".to_string()
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

/// Deployment-wide settings stored as a single row (`settings`/`app`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Fallback policy the scheduler uses when a database resolves no policy.
    #[serde(default = "default_policy_id")]
    pub default_policy_id: String,
    #[serde(default = "default_true")]
    pub retention_alerts_enabled: bool,
    /// Consecutive failures before a database shows up in the alerts view.
    #[serde(default = "default_failure_threshold")]
    pub consecutive_failure_alert_threshold: u32,
    #[serde(default = "crate::utils::now_utc")]
    pub updated_at: NaiveDateTime,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_policy_id: default_policy_id(),
            retention_alerts_enabled: true,
            consecutive_failure_alert_threshold: default_failure_threshold(),
            updated_at: now_utc(),
        }
    }
}

impl AppSettings {
    pub fn to_entity(&self) -> Result<TableEntity, BackupError> {
        Ok(TableEntity {
            partition_key: SETTINGS_PARTITION.to_string(),
            row_key: SETTINGS_ROW.to_string(),
            body: serde_json::to_value(self)?,
        })
    }

    pub fn from_entity(entity: &TableEntity) -> Result<Self, BackupError> {
        Ok(serde_json::from_value(entity.body.clone())?)
    }
}
