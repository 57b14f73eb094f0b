//! Logical database catalog entities.

use crate::models::engine::{AuthMethod, EngineType};
use crate::models::errors::BackupError;
use crate::storage::TableEntity;
use crate::utils::now_utc;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DATABASE_PARTITION: &str = "database";

fn default_true() -> bool {
    true
}

/// A logical database on an engine.
///
/// Persisted under partition `database`, row key = id. Credentials and the
/// backup policy may be inherited from the owning engine by reference; the
/// canonical values stay on the engine and are resolved at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub id: String,
    /// Display name.
    pub name: String,
    pub database_type: EngineType,
    #[serde(default)]
    pub engine_id: Option<String>,
    #[serde(default = "default_true")]
    pub use_engine_credentials: bool,
    #[serde(default = "default_true")]
    pub use_engine_policy: bool,
    pub host: String,
    pub port: u16,
    /// Actual database name on the server.
    pub database_name: String,
    #[serde(default)]
    pub auth_method: Option<AuthMethod>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_secret_name: Option<String>,
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub compression: bool,
    /// Optional override container for this database's artifacts.
    #[serde(default)]
    pub backup_destination: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl DatabaseConfig {
    pub fn new(
        name: impl Into<String>,
        database_type: EngineType,
        host: impl Into<String>,
        port: u16,
        database_name: impl Into<String>,
    ) -> Self {
        let now = now_utc();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            database_type,
            engine_id: None,
            use_engine_credentials: true,
            use_engine_policy: true,
            host: host.into(),
            port,
            database_name: database_name.into(),
            auth_method: None,
            username: None,
            password: None,
            password_secret_name: None,
            policy_id: None,
            enabled: true,
            compression: true,
            backup_destination: None,
            tags: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            created_by: None,
        }
    }

    pub fn to_entity(&self, include_password: bool) -> Result<TableEntity, BackupError> {
        let mut body = serde_json::to_value(self)?;
        if !include_password {
            if let Some(map) = body.as_object_mut() {
                map.remove("password");
            }
        }
        Ok(TableEntity {
            partition_key: DATABASE_PARTITION.to_string(),
            row_key: self.id.clone(),
            body,
        })
    }

    pub fn from_entity(entity: &TableEntity) -> Result<Self, BackupError> {
        let mut config: Self = serde_json::from_value(entity.body.clone())?;
        config.id = entity.row_key.clone();
        // Databases that predate engines keep their own credentials.
        if config.engine_id.is_none() {
            config.use_engine_credentials = false;
            config.use_engine_policy = false;
        }
        Ok(config)
    }
}
