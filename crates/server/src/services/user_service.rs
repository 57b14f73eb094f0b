//! User and access-request management.

use crate::models::errors::BackupError;
use crate::models::user::{AccessRequest, ACCESS_REQUEST_PARTITION, USER_PARTITION};
use crate::models::{AccessRequestStatus, User, UserRole};
use crate::storage::TableStore;
use crate::utils::now_utc;

#[derive(Debug, Default)]
pub struct UserFilter {
    pub page: usize,
    pub page_size: usize,
    pub search: Option<String>,
    /// "active" or "disabled"; anything else means all.
    pub status: Option<String>,
}

pub struct UserService {
    store: TableStore,
    access_requests: TableStore,
}

impl UserService {
    pub fn new(store: TableStore, access_requests: TableStore) -> Self {
        Self {
            store,
            access_requests,
        }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<User>, BackupError> {
        match self.store.get(USER_PARTITION, user_id).await? {
            Some(entity) => Ok(Some(User::from_entity(&entity)?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, BackupError> {
        Ok(self
            .all_users()
            .await?
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn all_users(&self) -> Result<Vec<User>, BackupError> {
        let mut users = Vec::new();
        for entity in self.store.query_partition(USER_PARTITION).await? {
            match User::from_entity(&entity) {
                Ok(user) => users.push(user),
                Err(e) => tracing::warn!("Skipping malformed user entity {}: {}", entity.row_key, e),
            }
        }
        Ok(users)
    }

    pub async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, usize, bool), BackupError> {
        let mut users = self.all_users().await?;

        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            users.retain(|u| {
                u.email.to_lowercase().contains(&needle) || u.name.to_lowercase().contains(&needle)
            });
        }
        match filter.status.as_deref() {
            Some("active") => users.retain(|u| u.enabled),
            Some("disabled") => users.retain(|u| !u.enabled),
            _ => {}
        }

        users.sort_by(|a, b| a.email.to_lowercase().cmp(&b.email.to_lowercase()));

        let total_count = users.len();
        let page = filter.page.max(1);
        let page_size = if filter.page_size == 0 { 50 } else { filter.page_size };
        let start_idx = (page - 1) * page_size;
        let end_idx = (start_idx + page_size).min(total_count);
        let page_users = if start_idx < total_count {
            users[start_idx..end_idx].to_vec()
        } else {
            Vec::new()
        };
        Ok((page_users, total_count, end_idx < total_count))
    }

    pub async fn save(&self, mut user: User) -> Result<User, BackupError> {
        user.updated_at = now_utc();
        self.store.upsert(&user.to_entity()?).await?;
        tracing::info!("Saved user: {} ({:?})", user.email, user.role);
        Ok(user)
    }

    pub async fn delete(&self, user_id: &str) -> Result<(), BackupError> {
        if !self.store.delete(USER_PARTITION, user_id).await? {
            return Err(BackupError::not_found("User", user_id));
        }
        tracing::info!("Deleted user: {}", user_id);
        Ok(())
    }

    pub async fn has_any_users(&self) -> Result<bool, BackupError> {
        Ok(!self.store.query_partition(USER_PARTITION).await?.is_empty())
    }

    /// Bootstrap path: create the first admin, but only on an empty user
    /// table.
    pub async fn create_first_admin(
        &self,
        user_id: &str,
        email: &str,
        name: &str,
    ) -> Result<User, BackupError> {
        if self.has_any_users().await? {
            return Err(BackupError::PolicyViolation(
                "Cannot create first admin: users already exist".into(),
            ));
        }
        let mut user = User::new(user_id, email, name, UserRole::Admin);
        user.last_login = Some(now_utc());
        self.save(user).await
    }

    pub async fn update_last_login(&self, user_id: &str) -> Result<Option<User>, BackupError> {
        let Some(mut user) = self.get(user_id).await? else {
            return Ok(None);
        };
        user.last_login = Some(now_utc());
        Ok(Some(self.save(user).await?))
    }

    // ===========================================
    // Access requests
    // ===========================================

    pub async fn save_access_request(&self, request: AccessRequest) -> Result<AccessRequest, BackupError> {
        self.access_requests.upsert(&request.to_entity()?).await?;
        Ok(request)
    }

    pub async fn pending_access_requests(&self) -> Result<Vec<AccessRequest>, BackupError> {
        let mut requests = Vec::new();
        for entity in self.access_requests.query_partition(ACCESS_REQUEST_PARTITION).await? {
            match AccessRequest::from_entity(&entity) {
                Ok(request) if request.status == AccessRequestStatus::Pending => {
                    requests.push(request)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Skipping malformed access request {}: {}", entity.row_key, e)
                }
            }
        }
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(requests)
    }
}
