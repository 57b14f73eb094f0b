//! Backup history endpoints.

use crate::models::audit::{AuditAction, AuditLog, AuditResourceType};
use crate::models::backup::{BackupStatus, TriggeredBy};
use crate::models::errors::{ApiError, BackupError};
use crate::models::EngineType;
use crate::services::history_service::HistoryFilter;
use crate::services::{AuditService, HistoryService, SettingsService};
use crate::utils::ensure_naive_utc;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

fn parse_date(query: &HashMap<String, String>, key: &str) -> Result<Option<chrono::NaiveDateTime>, ApiError> {
    match query.get(key) {
        None => Ok(None),
        Some(raw) => ensure_naive_utc(raw)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid {} '{}'", key, raw))),
    }
}

pub async fn list_backups(
    history: web::Data<Arc<HistoryService>>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let mut filter = HistoryFilter {
        page: query.get("page").and_then(|v| v.parse().ok()).unwrap_or(1),
        page_size: query
            .get("page_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(25),
        database_id: query.get("database_id").cloned(),
        database_ids: query.get("database_ids").map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }),
        start_date: parse_date(&query, "start_date")?,
        end_date: parse_date(&query, "end_date")?,
        ..Default::default()
    };

    if let Some(status) = query.get("status") {
        filter.status = Some(
            BackupStatus::parse(status)
                .ok_or_else(|| ApiError::bad_request(format!("Invalid status '{}'", status)))?,
        );
    }
    if let Some(triggered_by) = query.get("triggered_by") {
        filter.triggered_by = Some(TriggeredBy::parse(triggered_by).ok_or_else(|| {
            ApiError::bad_request(format!("Invalid triggered_by '{}'", triggered_by))
        })?);
    }
    if let Some(database_type) = query.get("database_type") {
        filter.database_type = Some(EngineType::parse(database_type).ok_or_else(|| {
            ApiError::bad_request(format!("Invalid database_type '{}'", database_type))
        })?);
    }

    let (results, total_count, has_more) = history.list_paged(&filter).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "results": results,
        "total_count": total_count,
        "has_more": has_more,
        "page": filter.page,
        "page_size": filter.page_size,
    })))
}

pub async fn list_alerts(
    history: web::Data<Arc<HistoryService>>,
    settings: web::Data<Arc<SettingsService>>,
) -> Result<HttpResponse, ApiError> {
    let threshold = settings.get().await?.consecutive_failure_alert_threshold as usize;
    let alerts = history.alerts(threshold.max(1)).await?;
    Ok(HttpResponse::Ok().json(alerts))
}

pub async fn database_stats(
    history: web::Data<Arc<HistoryService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let stats = history.stats_for_database(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(stats))
}

pub async fn delete_record(
    history: web::Data<Arc<HistoryService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let deleted = history
        .delete_record(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Backup", &id))?;

    audit
        .append(AuditLog::system(
            AuditAction::BackupDeleted,
            AuditResourceType::Backup,
            &deleted.id,
            &deleted.database_name,
        ))
        .await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteBlobQuery {
    pub blob_name: String,
}

pub async fn delete_by_blob_name(
    history: web::Data<Arc<HistoryService>>,
    audit: web::Data<Arc<AuditService>>,
    query: web::Query<DeleteBlobQuery>,
) -> Result<HttpResponse, ApiError> {
    let summary = history.delete_by_blob_name(&query.blob_name).await?;
    audit
        .append(
            AuditLog::system(
                AuditAction::BackupDeleted,
                AuditResourceType::Backup,
                &query.blob_name,
                &query.blob_name,
            )
            .with_details(serde_json::json!({
                "deleted_files": summary.deleted_files,
                "deleted_records": summary.deleted_records,
            })),
        )
        .await;
    Ok(HttpResponse::Ok().json(summary))
}

#[derive(Debug, Deserialize)]
pub struct DeleteBulkRequest {
    pub blob_names: Vec<String>,
}

pub async fn delete_bulk(
    history: web::Data<Arc<HistoryService>>,
    audit: web::Data<Arc<AuditService>>,
    body: web::Json<DeleteBulkRequest>,
) -> Result<HttpResponse, ApiError> {
    if body.blob_names.is_empty() {
        return Err(ApiError::bad_request("blob_names must not be empty"));
    }
    let summary = history.delete_bulk(&body.blob_names).await?;
    audit
        .append(
            AuditLog::system(
                AuditAction::BackupDeletedBulk,
                AuditResourceType::Backup,
                "bulk",
                "bulk delete",
            )
            .with_details(serde_json::json!({
                "requested": body.blob_names.len(),
                "deleted_files": summary.deleted_files,
                "deleted_records": summary.deleted_records,
            })),
        )
        .await;
    Ok(HttpResponse::Ok().json(summary))
}
