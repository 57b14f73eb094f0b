//! User management endpoints.

use crate::models::audit::{AuditAction, AuditLog, AuditResourceType};
use crate::models::errors::{ApiError, BackupError};
use crate::models::{User, UserRole};
use crate::services::user_service::UserFilter;
use crate::services::{AuditService, UserService};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct UserBody {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub async fn list_users(
    users: web::Data<Arc<UserService>>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let filter = UserFilter {
        page: query.get("page").and_then(|v| v.parse().ok()).unwrap_or(1),
        page_size: query
            .get("page_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(50),
        search: query.get("search").cloned(),
        status: query.get("status").cloned(),
    };
    let (users, total_count, has_more) = users.list(&filter).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "users": users,
        "total_count": total_count,
        "has_more": has_more,
    })))
}

pub async fn create_user(
    users: web::Data<Arc<UserService>>,
    audit: web::Data<Arc<AuditService>>,
    body: web::Json<UserBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.email.trim().is_empty() || !body.email.contains('@') {
        return Err(ApiError::bad_request("A valid email is required"));
    }
    if users.get_by_email(&body.email).await?.is_some() {
        return Err(ApiError::conflict(format!(
            "User with email '{}' already exists",
            body.email
        )));
    }

    let id = body
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut user = User::new(id, body.email, body.name, body.role);
    if let Some(enabled) = body.enabled {
        user.enabled = enabled;
    }

    let created = users.save(user).await?;
    audit
        .append(AuditLog::system(
            AuditAction::UserCreated,
            AuditResourceType::User,
            &created.id,
            &created.email,
        ))
        .await;
    Ok(HttpResponse::Created().json(created))
}

pub async fn get_user(
    users: web::Data<Arc<UserService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let user = users
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("User", &id))?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn update_user(
    users: web::Data<Arc<UserService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
    body: web::Json<UserBody>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let body = body.into_inner();
    let mut user = users
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("User", &id))?;

    user.email = body.email;
    user.name = body.name;
    user.role = body.role;
    if let Some(enabled) = body.enabled {
        user.enabled = enabled;
    }

    let updated = users.save(user).await?;
    audit
        .append(AuditLog::system(
            AuditAction::UserUpdated,
            AuditResourceType::User,
            &updated.id,
            &updated.email,
        ))
        .await;
    Ok(HttpResponse::Ok().json(updated))
}

pub async fn delete_user(
    users: web::Data<Arc<UserService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    users.delete(&id).await?;
    audit
        .append(AuditLog::system(
            AuditAction::UserDeleted,
            AuditResourceType::User,
            &id,
            &id,
        ))
        .await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": id })))
}
