//! Engine catalog endpoints.

use crate::models::audit::{AuditAction, AuditLog, AuditResourceType};
use crate::models::engine::AuthMethod;
use crate::models::errors::{ApiError, BackupError};
use crate::models::{Engine, EngineType};
use crate::services::engine_service::EngineFilter;
use crate::services::{AuditService, EngineService, HistoryService};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct EngineBody {
    pub name: String,
    pub engine_type: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub auth_method: Option<AuthMethod>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub discovery_enabled: Option<bool>,
}

fn parse_type(value: &str) -> Result<EngineType, ApiError> {
    EngineType::parse(value).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Invalid engine_type '{}'. Must be one of: mysql, postgresql, sqlserver",
            value
        ))
    })
}

pub async fn list_engines(
    engines: web::Data<Arc<EngineService>>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let mut filter = EngineFilter {
        search: query.get("search").cloned(),
        offset: query
            .get("offset")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        limit: query.get("limit").and_then(|v| v.parse().ok()),
        ..Default::default()
    };
    if let Some(engine_type) = query.get("type") {
        filter.engine_type = Some(parse_type(engine_type)?);
    }

    let (engines, total) = engines.list(&filter).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "engines": engines,
        "total": total,
    })))
}

pub async fn create_engine(
    engines: web::Data<Arc<EngineService>>,
    audit: web::Data<Arc<AuditService>>,
    body: web::Json<EngineBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let engine_type = parse_type(&body.engine_type)?;
    let port = body.port.unwrap_or_else(|| engine_type.default_port());

    let mut engine = Engine::new(body.name, engine_type, body.host, port);
    engine.auth_method = body.auth_method;
    engine.username = body.username;
    engine.password = body.password;
    engine.connection_string = body.connection_string;
    engine.policy_id = body.policy_id;
    engine.discovery_enabled = body.discovery_enabled.unwrap_or(false);

    let created = engines.create(engine).await?;
    audit
        .append(AuditLog::system(
            AuditAction::EngineCreated,
            AuditResourceType::Engine,
            &created.id,
            &created.name,
        ))
        .await;
    Ok(HttpResponse::Created().json(created))
}

pub async fn get_engine(
    engines: web::Data<Arc<EngineService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let engine = engines
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Engine", &id))?;
    Ok(HttpResponse::Ok().json(engine))
}

pub async fn update_engine(
    engines: web::Data<Arc<EngineService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
    body: web::Json<EngineBody>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let body = body.into_inner();
    let mut engine = engines
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Engine", &id))?;

    engine.name = body.name;
    if let Some(auth_method) = body.auth_method {
        engine.auth_method = Some(auth_method);
    }
    if body.username.is_some() {
        engine.username = body.username;
    }
    engine.password = body.password;
    if body.connection_string.is_some() {
        engine.connection_string = body.connection_string;
    }
    if body.policy_id.is_some() {
        engine.policy_id = body.policy_id;
    }
    if let Some(v) = body.discovery_enabled {
        engine.discovery_enabled = v;
    }

    let updated = engines.update(engine).await?;
    audit
        .append(AuditLog::system(
            AuditAction::EngineUpdated,
            AuditResourceType::Engine,
            &updated.id,
            &updated.name,
        ))
        .await;
    Ok(HttpResponse::Ok().json(updated))
}

#[derive(Debug, Deserialize)]
pub struct DeleteEngineQuery {
    #[serde(default)]
    pub cascade: bool,
}

pub async fn delete_engine(
    engines: web::Data<Arc<EngineService>>,
    history: web::Data<Arc<HistoryService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
    query: web::Query<DeleteEngineQuery>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let engine = engines
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Engine", &id))?;

    let removed_databases = engines.delete(&id, query.cascade).await?;
    for database_id in &removed_databases {
        if let Err(e) = history.delete_all_for_database(database_id).await {
            tracing::error!(
                "Failed to clean backups for cascaded database {}: {}",
                database_id,
                e
            );
        }
    }

    audit
        .append(
            AuditLog::system(
                AuditAction::EngineDeleted,
                AuditResourceType::Engine,
                &id,
                &engine.name,
            )
            .with_details(serde_json::json!({ "cascaded_databases": removed_databases })),
        )
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "deleted": id,
        "cascaded_databases": removed_databases,
    })))
}

pub async fn discover(
    engines: web::Data<Arc<EngineService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let discovered = engines.discover_databases(&id).await?;
    audit
        .append(
            AuditLog::system(
                AuditAction::EngineDiscovery,
                AuditResourceType::Engine,
                &id,
                &id,
            )
            .with_details(serde_json::json!({ "found": discovered.len() })),
        )
        .await;
    Ok(HttpResponse::Ok().json(discovered))
}
