//! Backup policy endpoints.

use crate::models::audit::{AuditAction, AuditLog, AuditResourceType};
use crate::models::errors::{ApiError, BackupError};
use crate::models::policy::TierConfig;
use crate::models::BackupPolicy;
use crate::services::{AuditService, PolicyService};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct PolicyBody {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hourly: Option<TierConfig>,
    #[serde(default)]
    pub daily: Option<TierConfig>,
    #[serde(default)]
    pub weekly: Option<TierConfig>,
    #[serde(default)]
    pub monthly: Option<TierConfig>,
    #[serde(default)]
    pub yearly: Option<TierConfig>,
}

impl PolicyBody {
    fn apply(self, policy: &mut BackupPolicy) {
        policy.name = self.name;
        policy.description = self.description;
        if let Some(hourly) = self.hourly {
            policy.hourly = hourly;
        }
        if let Some(daily) = self.daily {
            policy.daily = daily;
        }
        if let Some(weekly) = self.weekly {
            policy.weekly = weekly;
        }
        if let Some(monthly) = self.monthly {
            policy.monthly = monthly;
        }
        if let Some(yearly) = self.yearly {
            policy.yearly = yearly;
        }
    }
}

pub async fn list_policies(
    policies: web::Data<Arc<PolicyService>>,
) -> Result<HttpResponse, ApiError> {
    let list = policies.list().await?;
    Ok(HttpResponse::Ok().json(list))
}

pub async fn get_policy(
    policies: web::Data<Arc<PolicyService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let policy = policies
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Policy", &id))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "policy": policy,
        "summary": policy.summary(),
        "in_use_by": policies.databases_using_policy(&id).await?,
    })))
}

pub async fn create_policy(
    policies: web::Data<Arc<PolicyService>>,
    audit: web::Data<Arc<AuditService>>,
    body: web::Json<PolicyBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let id = body
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut policy = BackupPolicy::new(id, String::new());
    body.apply(&mut policy);

    let created = policies.create(policy).await?;
    audit
        .append(AuditLog::system(
            AuditAction::PolicyCreated,
            AuditResourceType::Policy,
            &created.id,
            &created.name,
        ))
        .await;
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_policy(
    policies: web::Data<Arc<PolicyService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
    body: web::Json<PolicyBody>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let mut policy = policies
        .get(&id)
        .await?
        .ok_or_else(|| BackupError::not_found("Policy", &id))?;
    body.into_inner().apply(&mut policy);

    let updated = policies.update(policy).await?;
    audit
        .append(AuditLog::system(
            AuditAction::PolicyUpdated,
            AuditResourceType::Policy,
            &updated.id,
            &updated.name,
        ))
        .await;
    Ok(HttpResponse::Ok().json(updated))
}

pub async fn delete_policy(
    policies: web::Data<Arc<PolicyService>>,
    audit: web::Data<Arc<AuditService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    policies.delete(&id).await?;
    audit
        .append(AuditLog::system(
            AuditAction::PolicyDeleted,
            AuditResourceType::Policy,
            &id,
            &id,
        ))
        .await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableStore;
    use crate::test_utils::create_test_pool;
    use actix_web::{test, App};

    async fn app_services() -> (web::Data<Arc<PolicyService>>, web::Data<Arc<AuditService>>) {
        let pool = create_test_pool().await;
        let policies = Arc::new(PolicyService::new(
            TableStore::new(pool.clone(), "backuppolicies"),
            TableStore::new(pool.clone(), "databaseconfigs"),
        ));
        policies.seed_default_policies().await.unwrap();
        let audit = Arc::new(AuditService::new(TableStore::new(pool, "auditlogs")));
        (web::Data::new(policies), web::Data::new(audit))
    }

    #[actix_web::test]
    async fn deleting_a_system_policy_returns_400_with_message() {
        let (policies, audit) = app_services().await;
        let app = test::init_service(
            App::new()
                .app_data(policies)
                .app_data(audit)
                .route(
                    "/backup-policies/{id}",
                    web::delete().to(delete_policy),
                ),
        )
        .await;

        let req = test::TestRequest::delete()
            .uri("/backup-policies/production-critical")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "System policies cannot be deleted");
    }

    #[actix_web::test]
    async fn policy_crud_round_trips_over_http() {
        let (policies, audit) = app_services().await;
        let app = test::init_service(
            App::new()
                .app_data(policies)
                .app_data(audit)
                .route("/backup-policies", web::get().to(list_policies))
                .route("/backup-policies", web::post().to(create_policy))
                .route("/backup-policies/{id}", web::get().to(get_policy))
                .route(
                    "/backup-policies/{id}",
                    web::delete().to(delete_policy),
                ),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/backup-policies")
            .set_json(serde_json::json!({
                "id": "custom",
                "name": "Custom",
                "daily": { "enabled": true, "keep_count": 3, "time": "01:30" }
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);

        let req = test::TestRequest::get()
            .uri("/backup-policies/custom")
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["summary"], "3d");
        assert_eq!(body["in_use_by"], 0);

        let req = test::TestRequest::get().uri("/backup-policies").to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body.as_array().unwrap().len(), 4);

        let req = test::TestRequest::delete()
            .uri("/backup-policies/custom")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        let req = test::TestRequest::get()
            .uri("/backup-policies/custom")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }
}
