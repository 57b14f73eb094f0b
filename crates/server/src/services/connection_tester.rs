//! Lightweight database connectivity probe.
//!
//! Runs the native client with a trivial query under a short timeout and
//! classifies failures: authentication, network, missing client tool, or
//! timeout all surface as distinct error types.

use crate::models::EngineType;
use crate::utils::tool_path;
use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

#[derive(Debug, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub duration_ms: f64,
}

pub struct ConnectionTester {
    timeout: Duration,
}

impl ConnectionTester {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn test_connection(
        &self,
        database_type: EngineType,
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
    ) -> ConnectionTestResult {
        let started = Instant::now();

        let (tool, cmd) = match database_type {
            EngineType::Mysql => {
                let mut cmd = Command::new(tool_path("mysql"));
                cmd.arg(format!("--host={}", host))
                    .arg(format!("--port={}", port))
                    .arg(format!("--user={}", username))
                    .arg("--connect-timeout=10")
                    .arg("-e")
                    .arg("SELECT 1")
                    .arg(database)
                    .env("MYSQL_PWD", password);
                ("mysql", cmd)
            }
            EngineType::Postgresql => {
                let mut cmd = Command::new(tool_path("psql"));
                cmd.arg(format!("--host={}", host))
                    .arg(format!("--port={}", port))
                    .arg(format!("--username={}", username))
                    .arg(format!("--dbname={}", database))
                    .arg("--no-password")
                    .arg("-c")
                    .arg("SELECT 1")
                    .env("PGPASSWORD", password);
                ("psql", cmd)
            }
            EngineType::Sqlserver => {
                let mut cmd = Command::new(tool_path("sqlcmd"));
                cmd.arg("-S")
                    .arg(format!("{},{}", host, port))
                    .arg("-U")
                    .arg(username)
                    .arg("-d")
                    .arg(database)
                    .arg("-Q")
                    .arg("SELECT 1")
                    .arg("-C")
                    .arg("-l")
                    .arg(self.timeout.as_secs().min(60).to_string())
                    .arg("-h")
                    .arg("-1")
                    .env("SQLCMDPASSWORD", password);
                ("sqlcmd", cmd)
            }
        };

        let result = self.run(tool, cmd).await;
        let duration_ms = (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
        ConnectionTestResult {
            duration_ms,
            ..result
        }
    }

    async fn run(&self, tool: &str, mut cmd: Command) -> ConnectionTestResult {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return ConnectionTestResult {
                    success: false,
                    message: format!("Connection timed out after {} seconds", self.timeout.as_secs()),
                    error_type: Some("timeout".into()),
                    duration_ms: 0.0,
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return ConnectionTestResult {
                    success: false,
                    message: format!("{} not found. Client tools are not installed.", tool),
                    error_type: Some("tool_not_found".into()),
                    duration_ms: 0.0,
                }
            }
            Ok(Err(e)) => {
                return ConnectionTestResult {
                    success: false,
                    message: format!("Failed to run {}: {}", tool, e),
                    error_type: Some("connection_failed".into()),
                    duration_ms: 0.0,
                }
            }
            Ok(Ok(output)) => output,
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() && !Self::looks_like_auth_failure(&stderr) {
            return ConnectionTestResult {
                success: true,
                message: "Connection successful".into(),
                error_type: None,
                duration_ms: 0.0,
            };
        }

        let raw = if stderr.trim().is_empty() { stdout } else { stderr };
        let message = Self::clean_error(&raw);
        let error_type = if Self::looks_like_auth_failure(&message) {
            "auth_failed"
        } else {
            "connection_failed"
        };

        ConnectionTestResult {
            success: false,
            message,
            error_type: Some(error_type.into()),
            duration_ms: 0.0,
        }
    }

    fn looks_like_auth_failure(text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("access denied")
            || lower.contains("authentication failed")
            || lower.contains("password authentication")
            || lower.contains("login failed")
    }

    fn clean_error(error: &str) -> String {
        let mut lines: Vec<&str> = error
            .lines()
            .filter(|l| !l.contains("Using a password on the command line"))
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return "Connection failed".to_string();
        }
        lines.truncate(4);
        let joined = lines.join(" ");
        if joined.len() > 200 {
            joined[..200].to_string()
        } else {
            joined
        }
    }
}
