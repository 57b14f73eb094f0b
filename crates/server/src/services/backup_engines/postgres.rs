//! PostgreSQL backup engine driving `pg_dump`.

use super::{run_streaming, BackupEngine, ConnectionInfo};
use crate::models::errors::BackupError;
use crate::models::EngineType;
use crate::utils::tool_path;
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

pub struct PostgresBackupEngine;

#[async_trait]
impl BackupEngine for PostgresBackupEngine {
    fn database_type(&self) -> EngineType {
        EngineType::Postgresql
    }

    fn file_extension(&self) -> &'static str {
        "sql"
    }

    async fn execute_backup(
        &self,
        conn: &ConnectionInfo,
        sink: &mut (dyn Write + Send),
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BackupError> {
        let mut cmd = Command::new(tool_path("pg_dump"));
        cmd.arg(format!("--host={}", conn.host))
            .arg(format!("--port={}", conn.port))
            .arg(format!("--username={}", conn.username))
            .arg("--no-password")
            .arg("--format=plain")
            .arg("--no-owner")
            .arg("--no-privileges")
            .arg("--clean")
            .arg("--if-exists")
            .arg(&conn.database)
            .env("PGPASSWORD", &conn.password);

        tracing::info!("Executing pg_dump for database: {}", conn.database);
        run_streaming(cmd, "pg_dump", sink, timeout, shutdown).await
    }
}
