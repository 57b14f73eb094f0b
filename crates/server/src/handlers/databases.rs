//! Database catalog endpoints.

use crate::models::audit::{AuditAction, AuditLog, AuditResourceType};
use crate::models::errors::{ApiError, BackupError};
use crate::models::{DatabaseConfig, EngineType};
use crate::services::database_service::DatabaseFilter;
use crate::services::{
    AuditService, ConnectionTester, DatabaseService, HistoryService, SchedulerService, SecretStore,
};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct DatabaseBody {
    pub name: String,
    pub database_type: String,
    #[serde(default)]
    pub engine_id: Option<String>,
    #[serde(default)]
    pub use_engine_credentials: Option<bool>,
    #[serde(default)]
    pub use_engine_policy: Option<bool>,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub compression: Option<bool>,
    #[serde(default)]
    pub backup_destination: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

fn parse_type(value: &str) -> Result<EngineType, ApiError> {
    EngineType::parse(value).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Invalid database_type '{}'. Must be one of: mysql, postgresql, sqlserver",
            value
        ))
    })
}

pub async fn list_databases(
    databases: web::Data<Arc<DatabaseService>>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let mut filter = DatabaseFilter {
        enabled_only: query
            .get("enabled_only")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false),
        host: query.get("host").cloned(),
        engine_id: query.get("engine_id").cloned(),
        policy_id: query.get("policy_id").cloned(),
        search: query.get("search").cloned(),
        ..Default::default()
    };
    if let Some(db_type) = query.get("type") {
        filter.database_type = Some(parse_type(db_type)?);
    }

    let databases = databases.list(&filter).await?;
    Ok(HttpResponse::Ok().json(databases))
}

pub async fn create_database(
    databases: web::Data<Arc<DatabaseService>>,
    audit: web::Data<Arc<AuditService>>,
    body: web::Json<DatabaseBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let database_type = parse_type(&body.database_type)?;
    let port = body.port.unwrap_or_else(|| database_type.default_port());

    let mut db = DatabaseConfig::new(body.name, database_type, body.host, port, body.database_name);
    db.engine_id = body.engine_id;
    if let Some(v) = body.use_engine_credentials {
        db.use_engine_credentials = v;
    }
    if let Some(v) = body.use_engine_policy {
        db.use_engine_policy = v;
    }
    db.username = body.username;
    db.password = body.password;
    db.policy_id = body.policy_id;
    db.enabled = body.enabled.unwrap_or(true);
    db.compression = body.compression.unwrap_or(true);
    db.backup_destination = body.backup_destination;
    db.tags = body.tags.unwrap_or_default();

    let created = databases.create(db).await?;
    audit
        .append(AuditLog::system(
            AuditAction::DatabaseCreated,
            AuditResourceType::Database,
            &created.id,
            &created.name,
        ))
        .await;
    Ok(HttpResponse::Created().json(created))
}

pub async fn get_database(
    databases: web::Data<Arc<DatabaseService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let db = databases
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Database", &id))?;
    Ok(HttpResponse::Ok().json(db))
}

pub async fn update_database(
    databases: web::Data<Arc<DatabaseService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
    body: web::Json<DatabaseBody>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let body = body.into_inner();
    let mut db = databases
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Database", &id))?;

    db.name = body.name;
    db.database_type = parse_type(&body.database_type)?;
    db.engine_id = body.engine_id;
    if let Some(v) = body.use_engine_credentials {
        db.use_engine_credentials = v;
    }
    if let Some(v) = body.use_engine_policy {
        db.use_engine_policy = v;
    }
    db.host = body.host;
    if let Some(port) = body.port {
        db.port = port;
    }
    db.database_name = body.database_name;
    if body.username.is_some() {
        db.username = body.username;
    }
    db.password = body.password;
    if body.policy_id.is_some() {
        db.policy_id = body.policy_id;
    }
    if let Some(v) = body.enabled {
        db.enabled = v;
    }
    if let Some(v) = body.compression {
        db.compression = v;
    }
    db.backup_destination = body.backup_destination;
    if let Some(tags) = body.tags {
        db.tags = tags;
    }

    let updated = databases.update(db).await?;
    audit
        .append(AuditLog::system(
            AuditAction::DatabaseUpdated,
            AuditResourceType::Database,
            &updated.id,
            &updated.name,
        ))
        .await;
    Ok(HttpResponse::Ok().json(updated))
}

#[derive(Debug, Deserialize)]
pub struct DeleteDatabaseQuery {
    #[serde(default)]
    pub delete_backups: bool,
}

pub async fn delete_database(
    databases: web::Data<Arc<DatabaseService>>,
    history: web::Data<Arc<HistoryService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
    query: web::Query<DeleteDatabaseQuery>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let db = databases
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Database", &id))?;

    let existing_backups = history.completed_for_database(&id).await?;
    if !existing_backups.is_empty() && !query.delete_backups {
        return Err(ApiError::conflict(format!(
            "Database has {} backup(s); pass delete_backups=true to remove them",
            existing_backups.len()
        )));
    }

    let summary = if query.delete_backups {
        Some(history.delete_all_for_database(&id).await?)
    } else {
        None
    };
    databases.delete(&id).await?;

    audit
        .append(
            AuditLog::system(
                AuditAction::DatabaseDeleted,
                AuditResourceType::Database,
                &id,
                &db.name,
            )
            .with_details(serde_json::json!({
                "backups_deleted": summary.as_ref().map(|s| s.deleted_records),
            })),
        )
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "deleted": id,
        "backups": summary,
    })))
}

pub async fn trigger_backup(
    scheduler: web::Data<Arc<SchedulerService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let job = scheduler.enqueue_manual(&id).await?;
    audit
        .append(AuditLog::system(
            AuditAction::BackupTriggered,
            AuditResourceType::Database,
            &job.database_id,
            &job.database_name,
        ))
        .await;
    Ok(HttpResponse::Accepted().json(job))
}

#[derive(Debug, Deserialize)]
pub struct TestConnectionRequest {
    pub database_type: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_secret_name: Option<String>,
}

pub async fn test_connection(
    tester: web::Data<Arc<ConnectionTester>>,
    secrets: web::Data<Arc<SecretStore>>,
    audit: web::Data<Arc<AuditService>>,
    body: web::Json<TestConnectionRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let database_type = parse_type(&body.database_type)?;
    let port = body.port.unwrap_or_else(|| database_type.default_port());

    let password = match (&body.password, &body.password_secret_name) {
        (Some(password), _) => password.clone(),
        (None, Some(secret_name)) => secrets
            .get_secret(secret_name)
            .await?
            .ok_or_else(|| BackupError::Credential(format!("secret '{}' not found", secret_name)))?,
        (None, None) => {
            return Err(ApiError::bad_request(
                "Either password or password_secret_name is required",
            ))
        }
    };

    let result = tester
        .test_connection(
            database_type,
            &body.host,
            port,
            &body.database,
            &body.username,
            &password,
        )
        .await;

    let mut entry = AuditLog::system(
        AuditAction::DatabaseTestConnection,
        AuditResourceType::Database,
        &body.host,
        &body.database,
    );
    if !result.success {
        entry = entry.failed(result.message.clone());
    }
    audit.append(entry).await;

    Ok(HttpResponse::Ok().json(result))
}
