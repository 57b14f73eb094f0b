//! Users and access requests.

use crate::models::errors::BackupError;
use crate::storage::TableEntity;
use crate::utils::now_utc;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const USER_PARTITION: &str = "users";
pub const ACCESS_REQUEST_PARTITION: &str = "access_requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Operator,
    Viewer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(default)]
    pub last_login: Option<NaiveDateTime>,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>, role: UserRole) -> Self {
        let now = now_utc();
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            role,
            enabled: true,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }

    pub fn to_entity(&self) -> Result<TableEntity, BackupError> {
        Ok(TableEntity {
            partition_key: USER_PARTITION.to_string(),
            row_key: self.id.clone(),
            body: serde_json::to_value(self)?,
        })
    }

    pub fn from_entity(entity: &TableEntity) -> Result<Self, BackupError> {
        let mut user: Self = serde_json::from_value(entity.body.clone())?;
        user.id = entity.row_key.clone();
        Ok(user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: String,
    pub email: String,
    pub name: String,
    pub status: AccessRequestStatus,
    pub requested_at: NaiveDateTime,
    #[serde(default)]
    pub resolved_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

impl AccessRequest {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.into(),
            name: name.into(),
            status: AccessRequestStatus::Pending,
            requested_at: now_utc(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn to_entity(&self) -> Result<TableEntity, BackupError> {
        Ok(TableEntity {
            partition_key: ACCESS_REQUEST_PARTITION.to_string(),
            row_key: self.id.clone(),
            body: serde_json::to_value(self)?,
        })
    }

    pub fn from_entity(entity: &TableEntity) -> Result<Self, BackupError> {
        let mut request: Self = serde_json::from_value(entity.body.clone())?;
        request.id = entity.row_key.clone();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_entity_round_trips() {
        let user = User::new("aad-123", "ops@example.com", "Ops Person", UserRole::Admin);
        let entity = user.to_entity().unwrap();
        assert_eq!(entity.partition_key, "users");
        let restored = User::from_entity(&entity).unwrap();
        assert_eq!(restored.email, "ops@example.com");
        assert_eq!(restored.role, UserRole::Admin);
        assert!(restored.enabled);
    }

    #[test]
    fn access_request_starts_pending() {
        let request = AccessRequest::new("new@example.com", "New Person");
        assert_eq!(request.status, AccessRequestStatus::Pending);
        let restored = AccessRequest::from_entity(&request.to_entity().unwrap()).unwrap();
        assert_eq!(restored.email, "new@example.com");
    }
}
