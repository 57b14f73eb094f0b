//! Database-type-specific backup engines.
//!
//! Each engine drives its native dump tool as a subprocess and streams the
//! output into the sink the pipeline provides. Credentials go through the
//! environment, never argv; argv leaks through `ps`.

pub mod mysql;
pub mod postgres;
pub mod sqlserver;

use crate::models::errors::BackupError;
use crate::models::EngineType;
use async_trait::async_trait;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;

pub use mysql::MySqlBackupEngine;
pub use postgres::PostgresBackupEngine;
pub use sqlserver::SqlServerBackupEngine;

/// Connection parameters for one dump, password already resolved.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// A backup engine for one database type.
#[async_trait]
pub trait BackupEngine: Send + Sync {
    fn database_type(&self) -> EngineType;

    /// File extension of the uncompressed artifact.
    fn file_extension(&self) -> &'static str;

    /// Whether gzip applies. Server-side formats (.bak) ignore compression.
    fn supports_compression(&self) -> bool {
        true
    }

    /// Run the dump and stream it into `sink`. Must honor the wall-clock
    /// timeout and the shutdown signal, killing the subprocess in both cases.
    async fn execute_backup(
        &self,
        conn: &ConnectionInfo,
        sink: &mut (dyn Write + Send),
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BackupError>;
}

/// Registry lookup by database type.
pub fn engine_for(database_type: EngineType) -> &'static dyn BackupEngine {
    match database_type {
        EngineType::Mysql => &MySqlBackupEngine,
        EngineType::Postgresql => &PostgresBackupEngine,
        EngineType::Sqlserver => &SqlServerBackupEngine,
    }
}

/// Resolve once the shutdown signal flips to true; pends forever if the
/// sender is gone (no shutdown will ever arrive).
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

const STDERR_TAIL_BYTES: usize = 2048;

/// Keep only the trailing `STDERR_TAIL_BYTES` of diagnostic output.
pub(crate) fn stderr_tail(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}

/// Launch `cmd`, stream its stdout into `sink`, and wait for exit.
///
/// Timeout and shutdown both kill the child. Non-zero exit surfaces as a
/// `BackupError::Execution` carrying the stderr tail.
pub(crate) async fn run_streaming(
    mut cmd: Command,
    tool: &str,
    sink: &mut (dyn Write + Send),
    timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), BackupError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BackupError::Execution {
            message: format!("{} not found. Client tools are not installed.", tool),
            stderr: String::new(),
        },
        _ => BackupError::Execution {
            message: format!("failed to launch {}: {}", tool, e),
            stderr: String::new(),
        },
    })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| BackupError::Storage("child stdout not captured".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| BackupError::Storage("child stderr not captured".into()))?;

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    });

    let copy = async {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = stdout
                .read(&mut buf)
                .await
                .map_err(|e| BackupError::Storage(format!("reading {} output: {}", tool, e)))?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])
                .map_err(|e| BackupError::Storage(format!("writing backup stream: {}", e)))?;
        }
        Ok::<(), BackupError>(())
    };

    let copied = tokio::select! {
        res = tokio::time::timeout(timeout, copy) => match res {
            Ok(inner) => inner,
            Err(_) => Err(BackupError::Timeout(timeout.as_secs())),
        },
        _ = shutdown_requested(shutdown) => Err(BackupError::Cancelled),
    };

    if let Err(e) = copied {
        let _ = child.kill().await;
        let _ = stderr_task.await;
        return Err(e);
    }

    let status = tokio::time::timeout(timeout, child.wait())
        .await
        .map_err(|_| BackupError::Timeout(timeout.as_secs()))?
        .map_err(|e| BackupError::Storage(format!("waiting for {}: {}", tool, e)))?;

    let stderr_buf = stderr_task.await.unwrap_or_default();

    if !status.success() {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(BackupError::Execution {
            message: format!("{} exited with status {}", tool, code),
            stderr: stderr_tail(&stderr_buf),
        });
    }

    Ok(())
}
