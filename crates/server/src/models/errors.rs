use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised by the backup core.
///
/// Variants are named by what they signal, not by where they came from; the
/// worker persists `kind()` into `BackupResult.error_details` so failures can
/// be grouped without parsing messages.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("credential error: {0}")]
    Credential(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("backup execution failed: {message}")]
    Execution { message: String, stderr: String },

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("validation error for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    #[error("{0}")]
    PolicyViolation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl BackupError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Human-readable message for failed backup results; execution failures
    /// carry the dump tool's stderr tail.
    pub fn detail_message(&self) -> String {
        match self {
            Self::Execution { message, stderr } if !stderr.is_empty() => {
                format!("{}: {}", message, stderr)
            }
            _ => self.to_string(),
        }
    }

    /// Stable error class persisted alongside failed backup results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Credential(_) => "CredentialError",
            Self::Connection(_) => "ConnectionError",
            Self::Execution { .. } => "BackupExecutionError",
            Self::Timeout(_) => "TimeoutError",
            Self::Compression(_) => "CompressionError",
            Self::Storage(_) => "StorageError",
            Self::Queue(_) => "QueueError",
            Self::Scheduler(_) => "SchedulerError",
            Self::Validation { .. } => "ValidationError",
            Self::NotFound { .. } => "NotFoundError",
            Self::PolicyViolation(_) => "PolicyViolation",
            Self::Cancelled => "Cancelled",
            Self::Serde(_) => "SerializationError",
        }
    }
}

impl From<sqlx::Error> for BackupError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// JSON error body returned by the HTTP surface.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self)
    }
}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        match &err {
            BackupError::Validation { .. } => Self::bad_request(err.to_string()),
            BackupError::NotFound { .. } => Self::not_found(err.to_string()),
            BackupError::PolicyViolation(_) => Self::bad_request(err.to_string()),
            BackupError::Credential(_) | BackupError::Connection(_) => {
                Self::bad_request(err.to_string())
            }
            _ => {
                // 5xx responses carry a generic message; the detail goes to the
                // log with a correlation id the operator can grep for.
                let correlation_id = uuid::Uuid::new_v4();
                tracing::error!("internal error [{}]: {}", correlation_id, err);
                Self::internal(format!("Internal error (ref {})", correlation_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(BackupError::Credential("x".into()).kind(), "CredentialError");
        assert_eq!(BackupError::Timeout(3600).kind(), "TimeoutError");
        assert_eq!(
            BackupError::Execution {
                message: "exit 2".into(),
                stderr: String::new(),
            }
            .kind(),
            "BackupExecutionError"
        );
    }

    #[test]
    fn execution_detail_message_carries_stderr_tail() {
        let err = BackupError::Execution {
            message: "mysqldump exited with status 2".into(),
            stderr: "Access denied for user".into(),
        };
        let detail = err.detail_message();
        assert!(detail.contains("status 2"));
        assert!(detail.contains("Access denied"));

        let err = BackupError::Timeout(3600);
        assert_eq!(err.detail_message(), err.to_string());
    }

    #[test]
    fn api_error_maps_statuses() {
        let err: ApiError = BackupError::not_found("Database", "db-1").into();
        assert_eq!(err.status, 404);

        let err: ApiError =
            BackupError::PolicyViolation("System policies cannot be deleted".into()).into();
        assert_eq!(err.status, 400);
        assert_eq!(err.message, "System policies cannot be deleted");

        let err: ApiError = BackupError::Storage("disk on fire".into()).into();
        assert_eq!(err.status, 500);
        assert!(!err.message.contains("disk on fire"));
    }
}
