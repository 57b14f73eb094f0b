//! Engine (database server) catalog entities.
//!
//! An engine is a host:port + credentials that hosts one or more logical
//! databases. Databases may inherit credentials and the default backup policy
//! from their engine.

use crate::models::errors::BackupError;
use crate::storage::TableEntity;
use crate::utils::now_utc;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const ENGINE_PARTITION: &str = "engine";

/// Supported database engine types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Mysql,
    Postgresql,
    Sqlserver,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgresql => "postgresql",
            Self::Sqlserver => "sqlserver",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mysql" => Some(Self::Mysql),
            "postgresql" => Some(Self::Postgresql),
            "sqlserver" => Some(Self::Sqlserver),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Mysql => 3306,
            Self::Postgresql => 5432,
            Self::Sqlserver => 1433,
        }
    }

    /// System databases that exist on every server of this type. Discovery
    /// returns them flagged rather than hiding them.
    pub fn system_databases(&self) -> BTreeSet<&'static str> {
        match self {
            Self::Mysql => ["mysql", "information_schema", "performance_schema", "sys"]
                .into_iter()
                .collect(),
            Self::Postgresql => ["postgres", "template0", "template1"].into_iter().collect(),
            Self::Sqlserver => ["master", "tempdb", "model", "msdb"].into_iter().collect(),
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication methods for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    UserPassword,
    ManagedIdentity,
    AzureAd,
    ConnectionString,
}

/// A database server in the catalog.
///
/// Persisted under partition `engine`, row key = id. The plaintext `password`
/// field is only ever written to the table when the deployment explicitly
/// allows plaintext passwords; otherwise passwords live in the secret store
/// under `password_secret_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    pub id: String,
    pub name: String,
    pub engine_type: EngineType,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub auth_method: Option<AuthMethod>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_secret_name: Option<String>,
    #[serde(default)]
    pub connection_string: Option<String>,
    /// Default policy contributed to databases with `use_engine_policy`.
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub discovery_enabled: bool,
    #[serde(default)]
    pub last_discovery: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl Engine {
    pub fn new(name: impl Into<String>, engine_type: EngineType, host: impl Into<String>, port: u16) -> Self {
        let now = now_utc();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            engine_type,
            host: host.into(),
            port,
            auth_method: None,
            username: None,
            password: None,
            password_secret_name: None,
            connection_string: None,
            policy_id: None,
            discovery_enabled: false,
            last_discovery: None,
            created_at: now,
            updated_at: now,
            created_by: None,
        }
    }

    /// Whether the engine carries enough credential material for discovery
    /// and for databases that inherit from it.
    pub fn has_credentials(&self) -> bool {
        match self.auth_method {
            Some(AuthMethod::UserPassword) | None => {
                self.username.is_some()
                    && (self.password.is_some() || self.password_secret_name.is_some())
            }
            Some(AuthMethod::ConnectionString) => self.connection_string.is_some(),
            Some(AuthMethod::ManagedIdentity) | Some(AuthMethod::AzureAd) => true,
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
            partition_key: ENGINE_PARTITION.to_string(),
            row_key: self.id.clone(),
            body,
        })
    }

    pub fn from_entity(entity: &TableEntity) -> Result<Self, BackupError> {
        let mut engine: Self = serde_json::from_value(entity.body.clone())?;
        engine.id = entity.row_key.clone();
        Ok(engine)
    }
}

/// A database found on an engine during discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDatabase {
    pub name: String,
    /// Already configured in the catalog.
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
    pub is_system: bool,
}
