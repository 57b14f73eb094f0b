// HTTP request handlers
// One handler function per route; every route is registered exactly once in
// `configure`.

pub mod audit;
pub mod backups;
pub mod databases;
pub mod engines;
pub mod health;
pub mod policies;
pub mod settings;
pub mod users;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Databases
            .route("/databases", web::get().to(databases::list_databases))
            .route("/databases", web::post().to(databases::create_database))
            .route(
                "/databases/test-connection",
                web::post().to(databases::test_connection),
            )
            .route("/databases/{id}", web::get().to(databases::get_database))
            .route("/databases/{id}", web::put().to(databases::update_database))
            .route("/databases/{id}", web::delete().to(databases::delete_database))
            .route(
                "/databases/{id}/backup",
                web::post().to(databases::trigger_backup),
            )
            // Engines
            .route("/engines", web::get().to(engines::list_engines))
            .route("/engines", web::post().to(engines::create_engine))
            .route("/engines/{id}", web::get().to(engines::get_engine))
            .route("/engines/{id}", web::put().to(engines::update_engine))
            .route("/engines/{id}", web::delete().to(engines::delete_engine))
            .route("/engines/{id}/discover", web::get().to(engines::discover))
            // Backup history
            .route("/backups", web::get().to(backups::list_backups))
            .route("/backups/alerts", web::get().to(backups::list_alerts))
            .route(
                "/backups/stats/{database_id}",
                web::get().to(backups::database_stats),
            )
            .route("/backups/delete", web::delete().to(backups::delete_by_blob_name))
            .route("/backups/delete-bulk", web::post().to(backups::delete_bulk))
            .route("/backups/{id}", web::delete().to(backups::delete_record))
            // Policies
            .route("/backup-policies", web::get().to(policies::list_policies))
            .route("/backup-policies", web::post().to(policies::create_policy))
            .route("/backup-policies/{id}", web::get().to(policies::get_policy))
            .route("/backup-policies/{id}", web::put().to(policies::update_policy))
            .route(
                "/backup-policies/{id}",
                web::delete().to(policies::delete_policy),
            )
            // Users
            .route("/users", web::get().to(users::list_users))
            .route("/users", web::post().to(users::create_user))
            .route("/users/{id}", web::get().to(users::get_user))
            .route("/users/{id}", web::put().to(users::update_user))
            .route("/users/{id}", web::delete().to(users::delete_user))
            // Audit
            .route("/audit", web::get().to(audit::list_audit))
            // Settings
            .route("/settings", web::get().to(settings::get_settings))
            .route("/settings", web::put().to(settings::update_settings))
            // Health
            .route("/health", web::get().to(health::health)),
    );
}
