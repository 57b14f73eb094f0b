//! Application settings endpoints.

use crate::models::audit::{AuditAction, AuditLog, AuditResourceType};
use crate::models::errors::ApiError;
use crate::models::AppSettings;
use crate::services::{AuditService, PolicyService, SettingsService};
use actix_web::{web, HttpResponse};
use std::sync::Arc;

pub async fn get_settings(
    settings: web::Data<Arc<SettingsService>>,
) -> Result<HttpResponse, ApiError> {
    let current = settings.get().await?;
    Ok(HttpResponse::Ok().json(current))
}

pub async fn update_settings(
    settings: web::Data<Arc<SettingsService>>,
    policies: web::Data<Arc<PolicyService>>,
    audit: web::Data<Arc<AuditService>>,
    body: web::Json<AppSettings>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();

    // The fallback policy must exist; the scheduler depends on it.
    if policies.get(&body.default_policy_id).await?.is_none() {
        return Err(ApiError::bad_request(format!(
            "default_policy_id '{}' does not reference an existing policy",
            body.default_policy_id
        )));
    }

    let saved = settings.save(body).await?;
    audit
        .append(AuditLog::system(
            AuditAction::SettingsUpdated,
            AuditResourceType::Settings,
            "app",
            "application settings",
        ))
        .await;
    Ok(HttpResponse::Ok().json(saved))
}
