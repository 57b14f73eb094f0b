//! Liveness endpoint.

use crate::models::errors::ApiError;
use crate::storage::JobQueue;
use actix_web::{web, HttpResponse};
use sqlx::SqlitePool;
use std::sync::Arc;

pub async fn health(
    pool: web::Data<SqlitePool>,
    queue: web::Data<Arc<JobQueue>>,
) -> Result<HttpResponse, ApiError> {
    let storage_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool.get_ref())
        .await
        .is_ok();
    let queue_depth = queue.depth().await.unwrap_or(0);

    let status = if storage_ok { "ok" } else { "degraded" };
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": status,
        "storage": storage_ok,
        "queue_depth": queue_depth,
    })))
}
