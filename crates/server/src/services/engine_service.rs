//! Engine (database server) catalog service: CRUD plus database discovery.

use crate::config::AppConfig;
use crate::models::database::DATABASE_PARTITION;
use crate::models::engine::ENGINE_PARTITION;
use crate::models::errors::BackupError;
use crate::models::{DatabaseConfig, DiscoveredDatabase, Engine, EngineType};
use crate::services::secret_service::SecretStore;
use crate::storage::TableStore;
use crate::utils::{now_utc, tool_path};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Listing filters for engines.
#[derive(Debug, Default)]
pub struct EngineFilter {
    pub search: Option<String>,
    pub engine_type: Option<EngineType>,
    pub limit: Option<usize>,
    pub offset: usize,
}

pub struct EngineService {
    store: TableStore,
    secrets: Arc<SecretStore>,
    config: Arc<AppConfig>,
}

impl EngineService {
    pub fn new(store: TableStore, secrets: Arc<SecretStore>, config: Arc<AppConfig>) -> Self {
        Self {
            store,
            secrets,
            config,
        }
    }

    fn secret_name(engine_id: &str) -> String {
        format!("engine-{}", engine_id)
    }

    pub async fn create(&self, mut engine: Engine) -> Result<Engine, BackupError> {
        crate::validators::validate_hostname(&engine.host)?;
        if let Some(connection_string) = &engine.connection_string {
            crate::validators::validate_connection_string(connection_string, engine.engine_type)?;
        }
        if engine.id.is_empty() {
            engine.id = uuid::Uuid::new_v4().to_string();
        }
        let now = now_utc();
        engine.created_at = now;
        engine.updated_at = now;

        if self.store.get(ENGINE_PARTITION, &engine.id).await?.is_some() {
            return Err(BackupError::PolicyViolation(format!(
                "Engine '{}' already exists",
                engine.id
            )));
        }

        // (host, port, engine_type) is unique across engines.
        for existing in self.list(&EngineFilter::default()).await?.0 {
            if existing.host == engine.host
                && existing.port == engine.port
                && existing.engine_type == engine.engine_type
            {
                return Err(BackupError::PolicyViolation(format!(
                    "An engine for {} at {}:{} already exists",
                    engine.engine_type, engine.host, engine.port
                )));
            }
        }

        self.stash_password(&mut engine).await?;
        let include_password = self.config.allow_plaintext_passwords;
        self.store.upsert(&engine.to_entity(include_password)?).await?;
        tracing::info!("Created engine: {} ({})", engine.id, engine.name);
        Ok(engine)
    }

    pub async fn get(&self, engine_id: &str) -> Result<Option<Engine>, BackupError> {
        match self.store.get(ENGINE_PARTITION, engine_id).await? {
            Some(entity) => Ok(Some(Engine::from_entity(&entity)?)),
            None => Ok(None),
        }
    }

    /// Like `get`, but with the password resolved out of the secret store so
    /// the caller can open a connection.
    pub async fn get_with_password(&self, engine_id: &str) -> Result<Option<Engine>, BackupError> {
        let Some(mut engine) = self.get(engine_id).await? else {
            return Ok(None);
        };
        if engine.password.is_none() {
            if let Some(secret_name) = &engine.password_secret_name {
                engine.password = self.secrets.get_secret(secret_name).await?;
            }
        }
        Ok(Some(engine))
    }

    /// Engines matching the filter, sorted by name, plus the pre-page total.
    pub async fn list(&self, filter: &EngineFilter) -> Result<(Vec<Engine>, usize), BackupError> {
        let mut engines = Vec::new();
        for entity in self.store.query_partition(ENGINE_PARTITION).await? {
            match Engine::from_entity(&entity) {
                Ok(engine) => engines.push(engine),
                Err(e) => tracing::warn!("Skipping malformed engine entity {}: {}", entity.row_key, e),
            }
        }

        engines.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            engines.retain(|e| {
                e.name.to_lowercase().contains(&needle) || e.host.to_lowercase().contains(&needle)
            });
        }
        if let Some(engine_type) = filter.engine_type {
            engines.retain(|e| e.engine_type == engine_type);
        }

        let total = engines.len();
        let engines = engines
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok((engines, total))
    }

    pub async fn update(&self, mut engine: Engine) -> Result<Engine, BackupError> {
        if let Some(connection_string) = &engine.connection_string {
            crate::validators::validate_connection_string(connection_string, engine.engine_type)?;
        }
        let existing = self
            .get(&engine.id)
            .await?
            .ok_or_else(|| BackupError::not_found("Engine", &engine.id))?;
        engine.created_at = existing.created_at;
        engine.updated_at = now_utc();
        if engine.password.is_none() {
            engine.password_secret_name = existing.password_secret_name.clone();
        }

        self.stash_password(&mut engine).await?;
        let include_password = self.config.allow_plaintext_passwords;
        self.store.upsert(&engine.to_entity(include_password)?).await?;
        tracing::info!("Updated engine: {} ({})", engine.id, engine.name);
        Ok(engine)
    }

    /// Delete an engine. Rejected while databases reference it unless
    /// `cascade` is set, in which case the referencing database configs are
    /// removed too and their ids returned for backup cleanup.
    pub async fn delete(&self, engine_id: &str, cascade: bool) -> Result<Vec<String>, BackupError> {
        let engine = self
            .get(engine_id)
            .await?
            .ok_or_else(|| BackupError::not_found("Engine", engine_id))?;

        let databases = self.databases_for_engine(engine_id).await?;
        if !databases.is_empty() && !cascade {
            return Err(BackupError::PolicyViolation(format!(
                "Engine is in use by {} database(s)",
                databases.len()
            )));
        }

        let mut removed = Vec::new();
        for db in databases {
            self.store.delete(DATABASE_PARTITION, &db.id).await?;
            removed.push(db.id);
        }

        if let Some(secret_name) = &engine.password_secret_name {
            let _ = self.secrets.delete_secret(secret_name).await;
        }
        self.store.delete(ENGINE_PARTITION, engine_id).await?;
        tracing::info!("Deleted engine: {} ({} databases cascaded)", engine_id, removed.len());
        Ok(removed)
    }

    pub async fn database_count(&self, engine_id: &str) -> Result<usize, BackupError> {
        Ok(self.databases_for_engine(engine_id).await?.len())
    }

    async fn databases_for_engine(&self, engine_id: &str) -> Result<Vec<DatabaseConfig>, BackupError> {
        let mut databases = Vec::new();
        for entity in self.store.query_partition(DATABASE_PARTITION).await? {
            if let Ok(db) = DatabaseConfig::from_entity(&entity) {
                if db.engine_id.as_deref() == Some(engine_id) {
                    databases.push(db);
                }
            }
        }
        Ok(databases)
    }

    /// Move a plaintext password into the secret store unless the deployment
    /// explicitly allows plaintext catalog passwords.
    async fn stash_password(&self, engine: &mut Engine) -> Result<(), BackupError> {
        if self.config.allow_plaintext_passwords {
            return Ok(());
        }
        if let Some(password) = engine.password.take() {
            let secret_name = Self::secret_name(&engine.id);
            self.secrets.set_secret(&secret_name, &password).await?;
            engine.password_secret_name = Some(secret_name);
        }
        Ok(())
    }

    // ===========================================
    // Discovery
    // ===========================================

    /// Enumerate the databases present on an engine.
    ///
    /// System databases come back flagged rather than hidden, and databases
    /// already configured in the catalog are flagged with their existing id.
    /// Already-configured databases are included even when the live probe
    /// fails, so the UI can still render the engine's state.
    pub async fn discover_databases(
        &self,
        engine_id: &str,
    ) -> Result<Vec<DiscoveredDatabase>, BackupError> {
        let mut engine = self
            .get_with_password(engine_id)
            .await?
            .ok_or_else(|| BackupError::not_found("Engine", engine_id))?;

        if !engine.has_credentials() {
            return Err(BackupError::Credential(
                "Engine doesn't have credentials for database discovery".into(),
            ));
        }

        let existing: Vec<DatabaseConfig> = self.databases_for_engine(engine_id).await?;
        let system_dbs = engine.engine_type.system_databases();

        let live = self.run_discovery(&engine).await;

        let mut discovered = Vec::new();
        match live {
            Ok(names) => {
                for name in names {
                    let is_system = system_dbs.contains(name.to_lowercase().as_str());
                    let existing_id = existing
                        .iter()
                        .find(|db| db.database_name == name)
                        .map(|db| db.id.clone());
                    discovered.push(DiscoveredDatabase {
                        name,
                        exists: existing_id.is_some(),
                        existing_id,
                        is_system,
                    });
                }
            }
            Err(e) if existing.is_empty() => return Err(e),
            Err(e) => tracing::warn!("Discovery failed for engine {}: {}", engine.name, e),
        }

        // Configured databases that the probe did not report still show up.
        for db in &existing {
            if !discovered.iter().any(|d| d.name == db.database_name) {
                discovered.push(DiscoveredDatabase {
                    name: db.database_name.clone(),
                    exists: true,
                    existing_id: Some(db.id.clone()),
                    is_system: false,
                });
            }
        }

        engine.last_discovery = Some(now_utc());
        let include_password = self.config.allow_plaintext_passwords;
        engine.password = None;
        self.store.upsert(&engine.to_entity(include_password)?).await?;

        Ok(discovered)
    }

    async fn run_discovery(&self, engine: &Engine) -> Result<Vec<String>, BackupError> {
        let username = engine
            .username
            .as_deref()
            .ok_or_else(|| BackupError::Credential("Engine has no username".into()))?;
        let password = engine
            .password
            .as_deref()
            .ok_or_else(|| BackupError::Credential("Engine has no resolvable password".into()))?;

        let mut cmd = match engine.engine_type {
            EngineType::Mysql => {
                let mut cmd = Command::new(tool_path("mysql"));
                cmd.arg(format!("--host={}", engine.host))
                    .arg(format!("--port={}", engine.port))
                    .arg(format!("--user={}", username))
                    .arg("-N")
                    .arg("-e")
                    .arg("SHOW DATABASES")
                    .env("MYSQL_PWD", password);
                cmd
            }
            EngineType::Postgresql => {
                let mut cmd = Command::new(tool_path("psql"));
                cmd.arg("-h")
                    .arg(&engine.host)
                    .arg("-p")
                    .arg(engine.port.to_string())
                    .arg("-U")
                    .arg(username)
                    .arg("-d")
                    .arg("postgres")
                    .arg("-t")
                    .arg("-A")
                    .arg("-c")
                    .arg("SELECT datname FROM pg_database WHERE datistemplate = false")
                    .env("PGPASSWORD", password);
                cmd
            }
            EngineType::Sqlserver => {
                let mut cmd = Command::new(tool_path("sqlcmd"));
                cmd.arg("-S")
                    .arg(format!("{},{}", engine.host, engine.port))
                    .arg("-U")
                    .arg(username)
                    .arg("-C")
                    .arg("-h")
                    .arg("-1")
                    .arg("-W")
                    .arg("-Q")
                    .arg("SELECT name FROM sys.databases WHERE database_id > 4")
                    .env("SQLCMDPASSWORD", password);
                cmd
            }
        };

        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let timeout = Duration::from_secs(self.config.connection_test_timeout_secs);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| BackupError::Timeout(self.config.connection_test_timeout_secs))?
            .map_err(|e| BackupError::Connection(format!("failed to run discovery: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::Connection(format!(
                "{} discovery failed: {}",
                engine.engine_type,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| {
                !line.is_empty()
                    && !line.starts_with('-')
                    && !line.starts_with('(')
                    && !line.to_lowercase().contains("rows affected")
            })
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_pool;

    async fn service() -> EngineService {
        let pool = create_test_pool().await;
        let secrets = Arc::new(SecretStore::with_key(pool.clone(), vec![9u8; 32]).unwrap());
        EngineService::new(
            TableStore::new(pool, "databaseconfigs"),
            secrets,
            Arc::new(AppConfig::defaults()),
        )
    }

    fn engine(name: &str, host: &str, port: u16) -> Engine {
        let mut engine = Engine::new(name, EngineType::Mysql, host, port);
        engine.username = Some("backup".into());
        engine.password = Some("pw".into());
        engine
    }

    #[tokio::test]
    async fn create_moves_password_into_secret_store() {
        let service = service().await;
        let created = service.create(engine("prod", "db1", 3306)).await.unwrap();

        assert!(created.password.is_none());
        let secret_name = created.password_secret_name.clone().unwrap();
        assert_eq!(secret_name, format!("engine-{}", created.id));
        assert_eq!(
            service.secrets.get_secret(&secret_name).await.unwrap().as_deref(),
            Some("pw")
        );

        // The persisted entity carries no plaintext password either.
        let stored = service.store.get(ENGINE_PARTITION, &created.id).await.unwrap().unwrap();
        assert!(stored.body.get("password").is_none());

        let resolved = service.get_with_password(&created.id).await.unwrap().unwrap();
        assert_eq!(resolved.password.as_deref(), Some("pw"));
    }

    #[tokio::test]
    async fn host_port_type_must_be_unique() {
        let service = service().await;
        service.create(engine("a", "db1", 3306)).await.unwrap();
        let err = service.create(engine("b", "db1", 3306)).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // Same host, different port is fine.
        service.create(engine("c", "db1", 3307)).await.unwrap();
    }

    #[tokio::test]
    async fn delete_is_rejected_while_databases_reference_the_engine() {
        let service = service().await;
        let created = service.create(engine("prod", "db1", 3306)).await.unwrap();

        let mut db = DatabaseConfig::new("orders", EngineType::Mysql, "db1", 3306, "orders");
        db.engine_id = Some(created.id.clone());
        service.store.upsert(&db.to_entity(false).unwrap()).await.unwrap();

        let err = service.delete(&created.id, false).await.unwrap_err();
        assert_eq!(err.to_string(), "Engine is in use by 1 database(s)");

        let removed = service.delete(&created.id, true).await.unwrap();
        assert_eq!(removed, vec![db.id.clone()]);
        assert!(service.get(&created.id).await.unwrap().is_none());
        assert_eq!(service.database_count(&created.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn listing_filters_by_search_and_type() {
        let service = service().await;
        service.create(engine("prod-mysql", "db1", 3306)).await.unwrap();
        let mut pg = Engine::new("prod-pg", EngineType::Postgresql, "pg1", 5432);
        pg.username = Some("postgres".into());
        pg.password = Some("pw".into());
        service.create(pg).await.unwrap();

        let (all, total) = service.list(&EngineFilter::default()).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);

        let (mysql_only, _) = service
            .list(&EngineFilter {
                engine_type: Some(EngineType::Mysql),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mysql_only.len(), 1);
        assert_eq!(mysql_only[0].name, "prod-mysql");

        let (searched, _) = service
            .list(&EngineFilter {
                search: Some("pg1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].name, "prod-pg");
    }

    #[tokio::test]
    async fn discovery_requires_credentials() {
        let service = service().await;
        let mut bare = Engine::new("bare", EngineType::Mysql, "db9", 3306);
        bare.password = None;
        bare.username = None;
        let created = service.create(bare).await.unwrap();

        let err = service.discover_databases(&created.id).await.unwrap_err();
        assert!(matches!(err, BackupError::Credential(_)));
    }
}
