//! Logical database catalog service.

use crate::config::AppConfig;
use crate::models::database::DATABASE_PARTITION;
use crate::models::errors::BackupError;
use crate::models::{DatabaseConfig, EngineType};
use crate::services::secret_service::SecretStore;
use crate::storage::TableStore;
use crate::utils::now_utc;
use std::sync::Arc;

/// Listing filters, matching the query parameters on `GET /databases`.
#[derive(Debug, Default)]
pub struct DatabaseFilter {
    pub enabled_only: bool,
    pub database_type: Option<EngineType>,
    pub host: Option<String>,
    pub engine_id: Option<String>,
    pub policy_id: Option<String>,
    pub search: Option<String>,
}

pub struct DatabaseService {
    store: TableStore,
    secrets: Arc<SecretStore>,
    config: Arc<AppConfig>,
}

impl DatabaseService {
    pub fn new(store: TableStore, secrets: Arc<SecretStore>, config: Arc<AppConfig>) -> Self {
        Self {
            store,
            secrets,
            config,
        }
    }

    fn secret_name(database_id: &str) -> String {
        format!("database-{}", database_id)
    }

    pub async fn create(&self, mut database: DatabaseConfig) -> Result<DatabaseConfig, BackupError> {
        if database.id.is_empty() {
            database.id = uuid::Uuid::new_v4().to_string();
        }
        crate::validators::validate_database_name(&database.database_name)?;
        crate::validators::validate_hostname(&database.host)?;
        if database.port == 0 {
            return Err(BackupError::validation("port", "must be between 1 and 65535"));
        }
        if self.store.get(DATABASE_PARTITION, &database.id).await?.is_some() {
            return Err(BackupError::PolicyViolation(format!(
                "Database '{}' already exists",
                database.id
            )));
        }

        let now = now_utc();
        database.created_at = now;
        database.updated_at = now;

        self.stash_password(&mut database).await?;
        let include_password = self.config.allow_plaintext_passwords;
        self.store.upsert(&database.to_entity(include_password)?).await?;
        tracing::info!("Created database config: {} ({})", database.id, database.name);
        Ok(database)
    }

    pub async fn get(&self, database_id: &str) -> Result<Option<DatabaseConfig>, BackupError> {
        match self.store.get(DATABASE_PARTITION, database_id).await? {
            Some(entity) => Ok(Some(DatabaseConfig::from_entity(&entity)?)),
            None => Ok(None),
        }
    }

    /// All databases matching the filter, sorted by display name.
    pub async fn list(&self, filter: &DatabaseFilter) -> Result<Vec<DatabaseConfig>, BackupError> {
        let mut databases = Vec::new();
        for entity in self.store.query_partition(DATABASE_PARTITION).await? {
            match DatabaseConfig::from_entity(&entity) {
                Ok(db) => databases.push(db),
                Err(e) => {
                    tracing::warn!("Skipping malformed database entity {}: {}", entity.row_key, e)
                }
            }
        }

        if filter.enabled_only {
            databases.retain(|db| db.enabled);
        }
        if let Some(database_type) = filter.database_type {
            databases.retain(|db| db.database_type == database_type);
        }
        if let Some(host) = &filter.host {
            databases.retain(|db| db.host.eq_ignore_ascii_case(host));
        }
        if let Some(engine_id) = &filter.engine_id {
            databases.retain(|db| db.engine_id.as_deref() == Some(engine_id.as_str()));
        }
        if let Some(policy_id) = &filter.policy_id {
            databases.retain(|db| db.policy_id.as_deref() == Some(policy_id.as_str()));
        }
        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            databases.retain(|db| {
                db.name.to_lowercase().contains(&needle)
                    || db.database_name.to_lowercase().contains(&needle)
                    || db.host.to_lowercase().contains(&needle)
            });
        }

        databases.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(databases)
    }

    pub async fn update(&self, mut database: DatabaseConfig) -> Result<DatabaseConfig, BackupError> {
        crate::validators::validate_database_name(&database.database_name)?;
        crate::validators::validate_hostname(&database.host)?;
        let existing = self
            .get(&database.id)
            .await?
            .ok_or_else(|| BackupError::not_found("Database", &database.id))?;
        database.created_at = existing.created_at;
        database.updated_at = now_utc();
        if database.password.is_none() {
            database.password_secret_name = existing.password_secret_name.clone();
        }

        self.stash_password(&mut database).await?;
        let include_password = self.config.allow_plaintext_passwords;
        self.store.upsert(&database.to_entity(include_password)?).await?;
        tracing::info!("Updated database config: {} ({})", database.id, database.name);
        Ok(database)
    }

    /// Remove the catalog row and its secret. Backup cleanup is the caller's
    /// responsibility (see the delete handler's cascade rule).
    pub async fn delete(&self, database_id: &str) -> Result<(), BackupError> {
        let database = self
            .get(database_id)
            .await?
            .ok_or_else(|| BackupError::not_found("Database", database_id))?;

        if let Some(secret_name) = &database.password_secret_name {
            if secret_name == &Self::secret_name(database_id) {
                let _ = self.secrets.delete_secret(secret_name).await;
            }
        }
        self.store.delete(DATABASE_PARTITION, database_id).await?;
        tracing::info!("Deleted database config: {}", database_id);
        Ok(())
    }

    async fn stash_password(&self, database: &mut DatabaseConfig) -> Result<(), BackupError> {
        if self.config.allow_plaintext_passwords {
            return Ok(());
        }
        if let Some(password) = database.password.take() {
            let secret_name = Self::secret_name(&database.id);
            self.secrets.set_secret(&secret_name, &password).await?;
            database.password_secret_name = Some(secret_name);
        }
        Ok(())
    }
}
