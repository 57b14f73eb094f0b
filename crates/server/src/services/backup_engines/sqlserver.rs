//! SQL Server backup engine driving `sqlcmd`.
//!
//! SQL Server backups are produced server-side: `BACKUP DATABASE ... TO DISK`
//! writes a `.bak` to a spool path, which is then streamed into the sink and
//! removed. The spool path must be visible to both the server and this
//! process (same host, or a shared mount), which is the deployment contract
//! for `.bak` backups. The `.bak` format is already server-generated, so the
//! compression flag does not apply.

use super::{shutdown_requested, BackupEngine, ConnectionInfo};
use crate::models::errors::BackupError;
use crate::models::EngineType;
use crate::utils::tool_path;
use async_trait::async_trait;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;

pub struct SqlServerBackupEngine;

impl SqlServerBackupEngine {
    fn spool_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("dbvault-{}.bak", uuid::Uuid::new_v4()))
    }
}

#[async_trait]
impl BackupEngine for SqlServerBackupEngine {
    fn database_type(&self) -> EngineType {
        EngineType::Sqlserver
    }

    fn file_extension(&self) -> &'static str {
        "bak"
    }

    fn supports_compression(&self) -> bool {
        false
    }

    async fn execute_backup(
        &self,
        conn: &ConnectionInfo,
        sink: &mut (dyn Write + Send),
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BackupError> {
        let spool = Self::spool_path();
        let spool_display = spool.display().to_string();

        let query = format!(
            "BACKUP DATABASE [{}] TO DISK = N'{}' WITH INIT, FORMAT",
            conn.database.replace(']', "]]"),
            spool_display.replace('\'', "''"),
        );

        let mut cmd = Command::new(tool_path("sqlcmd"));
        cmd.arg("-S")
            .arg(format!("{},{}", conn.host, conn.port))
            .arg("-U")
            .arg(&conn.username)
            .arg("-C")
            .arg("-b")
            .arg("-Q")
            .arg(&query)
            .env("SQLCMDPASSWORD", &conn.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!("Executing BACKUP DATABASE for: {}", conn.database);

        let result = self
            .run_backup_command(cmd, &spool, sink, timeout, shutdown)
            .await;

        let _ = tokio::fs::remove_file(&spool).await;
        result
    }
}

impl SqlServerBackupEngine {
    async fn run_backup_command(
        &self,
        mut cmd: Command,
        spool: &std::path::Path,
        sink: &mut (dyn Write + Send),
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BackupError> {
        let run = async {
            let output = cmd.output().await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BackupError::Execution {
                    message: "sqlcmd not found. SQL Server client tools are not installed.".into(),
                    stderr: String::new(),
                },
                _ => BackupError::Execution {
                    message: format!("failed to launch sqlcmd: {}", e),
                    stderr: String::new(),
                },
            })?;

            if !output.status.success() {
                let diagnostics = if output.stderr.is_empty() {
                    output.stdout.clone()
                } else {
                    output.stderr.clone()
                };
                return Err(BackupError::Execution {
                    message: "BACKUP DATABASE command failed".into(),
                    stderr: super::stderr_tail(&diagnostics),
                });
            }

            // Stream the spooled .bak into the sink.
            let mut file = tokio::fs::File::open(spool).await.map_err(|e| {
                BackupError::Execution {
                    message: format!("backup file was not produced at {}: {}", spool.display(), e),
                    stderr: String::new(),
                }
            })?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = file
                    .read(&mut buf)
                    .await
                    .map_err(|e| BackupError::Storage(format!("reading backup file: {}", e)))?;
                if n == 0 {
                    break;
                }
                sink.write_all(&buf[..n])
                    .map_err(|e| BackupError::Storage(format!("writing backup stream: {}", e)))?;
            }
            Ok(())
        };

        tokio::select! {
            res = tokio::time::timeout(timeout, run) => match res {
                Ok(inner) => inner,
                Err(_) => Err(BackupError::Timeout(timeout.as_secs())),
            },
            _ = shutdown_requested(shutdown) => Err(BackupError::Cancelled),
        }
    }
}
