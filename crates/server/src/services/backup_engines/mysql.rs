//! MySQL backup engine driving `mysqldump`.

use super::{run_streaming, BackupEngine, ConnectionInfo};
use crate::models::errors::BackupError;
use crate::models::EngineType;
use crate::utils::tool_path;
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

pub struct MySqlBackupEngine;

#[async_trait]
impl BackupEngine for MySqlBackupEngine {
    fn database_type(&self) -> EngineType {
        EngineType::Mysql
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
        let mut cmd = Command::new(tool_path("mysqldump"));
        cmd.arg(format!("--host={}", conn.host))
            .arg(format!("--port={}", conn.port))
            .arg(format!("--user={}", conn.username))
            .arg("--single-transaction")
            .arg("--routines")
            .arg("--triggers")
            .arg("--events")
            .arg("--set-gtid-purged=OFF")
            .arg("--skip-lock-tables")
            .arg("--quick")
            .arg("--hex-blob")
            .arg(&conn.database)
            // Password via environment, never argv.
            .env("MYSQL_PWD", &conn.password);

        tracing::info!("Executing mysqldump for database: {}", conn.database);
        run_streaming(cmd, "mysqldump", sink, timeout, shutdown).await
    }
}
