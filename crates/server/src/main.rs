// Suppress dead code warnings for interface-level helpers consumed only by
// tests or future callers
#![allow(dead_code)]

mod config;
mod db;
mod handlers;
mod models;
mod services;
mod storage;
mod utils;
mod validators;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use storage::{BlobStore, JobQueue, TableStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(config::AppConfig::from_env());
    tracing::info!(
        "Starting backup orchestrator (queue: {}, workers: {})",
        config.backup_queue_name,
        config.worker_count
    );

    // Initialize database connection pool
    let pool = match db::init_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to initialize database pool: {}", e);
            std::process::exit(1);
        }
    };

    // Run migrations
    if let Err(e) = db::migrations::run_migrations(&pool, &config).await {
        tracing::error!("Failed to run database migrations: {}", e);
        std::process::exit(1);
    }

    // Storage backends
    let blobs = Arc::new(BlobStore::new(config.blob_root.clone()));
    let queue = Arc::new(JobQueue::new(pool.clone(), config.backup_queue_name.clone()));
    let catalog = TableStore::new(pool.clone(), config.config_table_name.clone());

    // Secret store
    let secrets = match services::SecretStore::new(pool.clone()) {
        Ok(secrets) => Arc::new(secrets),
        Err(e) => {
            tracing::error!("Failed to initialize secret store: {}", e);
            std::process::exit(1);
        }
    };

    // Catalog and history services
    let databases = Arc::new(services::DatabaseService::new(
        catalog.clone(),
        secrets.clone(),
        config.clone(),
    ));
    let engines = Arc::new(services::EngineService::new(
        catalog.clone(),
        secrets.clone(),
        config.clone(),
    ));
    let policies = Arc::new(services::PolicyService::new(
        TableStore::new(pool.clone(), config.policies_table_name.clone()),
        catalog,
    ));
    let history = Arc::new(services::HistoryService::new(
        TableStore::new(pool.clone(), config.history_table_name.clone()),
        blobs.clone(),
        config.backup_container_name.clone(),
    ));
    let settings = Arc::new(services::SettingsService::new(TableStore::new(
        pool.clone(),
        config.settings_table_name.clone(),
    )));
    let audit = Arc::new(services::AuditService::new(TableStore::new(
        pool.clone(),
        config.audit_table_name.clone(),
    )));
    let users = Arc::new(services::UserService::new(
        TableStore::new(pool.clone(), config.users_table_name.clone()),
        TableStore::new(pool.clone(), config.access_requests_table_name.clone()),
    ));

    // Seed system policies and the settings row
    if let Err(e) = policies.seed_default_policies().await {
        tracing::error!("Failed to seed default policies: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = settings.ensure_seeded(&config.default_policy_id).await {
        tracing::warn!("Failed to seed application settings: {}", e);
    }

    // Backup pipeline and worker pool
    let pipeline = Arc::new(services::BackupService::new(
        secrets.clone(),
        databases.clone(),
        engines.clone(),
        blobs.clone(),
        config.clone(),
    ));
    let worker_pool = Arc::new(services::WorkerPool::new(
        queue.clone(),
        history.clone(),
        pipeline,
        audit.clone(),
        config.clone(),
    ));
    let worker_handles = worker_pool.start();

    // Scheduler tick and retention pass
    let scheduler = Arc::new(services::SchedulerService::new(
        databases.clone(),
        engines.clone(),
        policies.clone(),
        history.clone(),
        settings.clone(),
        queue.clone(),
    ));
    let retention = Arc::new(services::RetentionService::new(
        databases.clone(),
        engines.clone(),
        policies.clone(),
        history.clone(),
        settings.clone(),
        audit.clone(),
    ));
    let _sched = match services::scheduler_service::start_schedulers(
        scheduler.clone(),
        retention,
        config.clone(),
    )
    .await
    {
        Ok(sched) => sched,
        Err(e) => {
            tracing::error!("Failed to start schedulers: {}", e);
            std::process::exit(1);
        }
    };

    let tester = Arc::new(services::ConnectionTester::new(
        config.connection_test_timeout_secs,
    ));

    let host = config.api_host.clone();
    let port = config.api_port;
    tracing::info!("Listening on {}:{}", host, port);

    let server = HttpServer::new({
        let pool = pool.clone();
        let queue = queue.clone();
        move || {
            let cors = Cors::permissive().max_age(3600);
            App::new()
                .wrap(cors)
                .wrap(Logger::default())
                .app_data(web::Data::new(pool.clone()))
                .app_data(web::Data::new(databases.clone()))
                .app_data(web::Data::new(engines.clone()))
                .app_data(web::Data::new(policies.clone()))
                .app_data(web::Data::new(history.clone()))
                .app_data(web::Data::new(settings.clone()))
                .app_data(web::Data::new(audit.clone()))
                .app_data(web::Data::new(users.clone()))
                .app_data(web::Data::new(secrets.clone()))
                .app_data(web::Data::new(queue.clone()))
                .app_data(web::Data::new(scheduler.clone()))
                .app_data(web::Data::new(tester.clone()))
                .configure(handlers::configure)
        }
    })
    .bind((host, port))?
    .run();

    let result = server.await;

    tracing::info!("HTTP server stopped; shutting down workers");
    worker_handles.shutdown().await;

    result
}
