//! Audit log endpoints.

use crate::models::audit::{AuditAction, AuditResourceType, AuditStatus};
use crate::models::errors::ApiError;
use crate::services::audit_service::AuditFilter;
use crate::services::AuditService;
use crate::utils::ensure_naive_utc;
use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use std::sync::Arc;

fn parse_enum<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T, ApiError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| ApiError::bad_request(format!("Invalid {} '{}'", key, raw)))
}

pub async fn list_audit(
    audit: web::Data<Arc<AuditService>>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let mut filter = AuditFilter {
        page: query.get("page").and_then(|v| v.parse().ok()).unwrap_or(1),
        page_size: query
            .get("page_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(50),
        user_id: query.get("user").cloned(),
        ..Default::default()
    };

    if let Some(raw) = query.get("start_date") {
        filter.start_date = Some(
            ensure_naive_utc(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Invalid start_date '{}'", raw)))?,
        );
    }
    if let Some(raw) = query.get("end_date") {
        filter.end_date = Some(
            ensure_naive_utc(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Invalid end_date '{}'", raw)))?,
        );
    }
    if let Some(raw) = query.get("action") {
        filter.action = Some(parse_enum::<AuditAction>("action", raw)?);
    }
    if let Some(raw) = query.get("resource_type") {
        filter.resource_type = Some(parse_enum::<AuditResourceType>("resource_type", raw)?);
    }
    if let Some(raw) = query.get("status") {
        filter.status = Some(parse_enum::<AuditStatus>("status", raw)?);
    }

    let (entries, total_count, has_more) = audit.list(&filter).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "entries": entries,
        "total_count": total_count,
        "has_more": has_more,
    })))
}
