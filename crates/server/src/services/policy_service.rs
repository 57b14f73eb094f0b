//! Backup policy CRUD and seeding.

use crate::models::database::DATABASE_PARTITION;
use crate::models::policy::{default_policies, BackupPolicy, POLICY_PARTITION};
use crate::models::errors::BackupError;
use crate::models::DatabaseConfig;
use crate::storage::TableStore;
use crate::utils::now_utc;

pub struct PolicyService {
    store: TableStore,
    /// The catalog table, used to count databases referencing a policy.
    catalog: TableStore,
}

impl PolicyService {
    pub fn new(store: TableStore, catalog: TableStore) -> Self {
        Self { store, catalog }
    }

    /// Seed the system policies that ship with the product. Existing rows are
    /// left untouched so operator edits to keep counts survive restarts.
    pub async fn seed_default_policies(&self) -> Result<(), BackupError> {
        for policy in default_policies() {
            if self.store.get(POLICY_PARTITION, &policy.id).await?.is_none() {
                self.store.upsert(&policy.to_entity()?).await?;
                tracing::info!("Seeded default policy: {}", policy.id);
            }
        }
        Ok(())
    }

    pub async fn get(&self, policy_id: &str) -> Result<Option<BackupPolicy>, BackupError> {
        match self.store.get(POLICY_PARTITION, policy_id).await? {
            Some(entity) => Ok(Some(BackupPolicy::from_entity(&entity)?)),
            None => Ok(None),
        }
    }

    /// All policies, system policies first, then by name.
    pub async fn list(&self) -> Result<Vec<BackupPolicy>, BackupError> {
        let mut policies = Vec::new();
        for entity in self.store.query_partition(POLICY_PARTITION).await? {
            match BackupPolicy::from_entity(&entity) {
                Ok(policy) => policies.push(policy),
                Err(e) => tracing::warn!("Skipping malformed policy entity {}: {}", entity.row_key, e),
            }
        }
        policies.sort_by(|a, b| {
            b.is_system
                .cmp(&a.is_system)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(policies)
    }

    pub async fn create(&self, mut policy: BackupPolicy) -> Result<BackupPolicy, BackupError> {
        policy.validate()?;
        if self.store.get(POLICY_PARTITION, &policy.id).await?.is_some() {
            return Err(BackupError::PolicyViolation(format!(
                "Policy '{}' already exists",
                policy.id
            )));
        }
        let now = now_utc();
        policy.created_at = now;
        policy.updated_at = now;
        self.store.upsert(&policy.to_entity()?).await?;
        tracing::info!("Created backup policy: {} ({})", policy.name, policy.id);
        Ok(policy)
    }

    pub async fn update(&self, mut policy: BackupPolicy) -> Result<BackupPolicy, BackupError> {
        policy.validate()?;
        let existing = self
            .get(&policy.id)
            .await?
            .ok_or_else(|| BackupError::not_found("Policy", &policy.id))?;
        // System flag is not editable through the API.
        policy.is_system = existing.is_system;
        policy.created_at = existing.created_at;
        policy.updated_at = now_utc();
        self.store.upsert(&policy.to_entity()?).await?;
        tracing::info!("Updated backup policy: {} ({})", policy.name, policy.id);
        Ok(policy)
    }

    /// Delete a policy. System policies and policies referenced by any
    /// database are protected.
    pub async fn delete(&self, policy_id: &str) -> Result<(), BackupError> {
        let policy = self
            .get(policy_id)
            .await?
            .ok_or_else(|| BackupError::not_found("Policy", policy_id))?;

        if policy.is_system {
            return Err(BackupError::PolicyViolation(
                "System policies cannot be deleted".into(),
            ));
        }

        let in_use = self.databases_using_policy(policy_id).await?;
        if in_use > 0 {
            return Err(BackupError::PolicyViolation(format!(
                "Policy is in use by {} database(s)",
                in_use
            )));
        }

        self.store.delete(POLICY_PARTITION, policy_id).await?;
        tracing::info!("Deleted backup policy: {}", policy_id);
        Ok(())
    }

    /// Count databases whose effective policy reference points at this id.
    pub async fn databases_using_policy(&self, policy_id: &str) -> Result<usize, BackupError> {
        let mut count = 0;
        for entity in self.catalog.query_partition(DATABASE_PARTITION).await? {
            if let Ok(db) = DatabaseConfig::from_entity(&entity) {
                if db.policy_id.as_deref() == Some(policy_id) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::TierConfig;
    use crate::models::EngineType;
    use crate::test_utils::create_test_pool;

    async fn service() -> PolicyService {
        let pool = create_test_pool().await;
        let service = PolicyService::new(
            TableStore::new(pool.clone(), "backuppolicies"),
            TableStore::new(pool, "databaseconfigs"),
        );
        service.seed_default_policies().await.unwrap();
        service
    }

    #[tokio::test]
    async fn seeding_is_idempotent_and_preserves_edits() {
        let service = service().await;

        let mut standard = service.get("production-standard").await.unwrap().unwrap();
        standard.daily.keep_count = 30;
        service.store.upsert(&standard.to_entity().unwrap()).await.unwrap();

        service.seed_default_policies().await.unwrap();
        let reread = service.get("production-standard").await.unwrap().unwrap();
        assert_eq!(reread.daily.keep_count, 30);
        assert_eq!(service.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn system_policies_cannot_be_deleted() {
        let service = service().await;
        let err = service.delete("production-critical").await.unwrap_err();
        assert!(err.to_string().contains("System policies cannot be deleted"));
        assert!(service.get("production-critical").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn policies_in_use_cannot_be_deleted() {
        let service = service().await;

        let mut custom = BackupPolicy::new("custom", "Custom");
        custom.daily = TierConfig::enabled(3);
        service.create(custom).await.unwrap();

        for name in ["a", "b"] {
            let mut db = DatabaseConfig::new(name, EngineType::Mysql, "h", 3306, name);
            db.policy_id = Some("custom".into());
            service.catalog.upsert(&db.to_entity(false).unwrap()).await.unwrap();
        }

        let err = service.delete("custom").await.unwrap_err();
        assert_eq!(err.to_string(), "Policy is in use by 2 database(s)");
    }

    #[tokio::test]
    async fn unused_custom_policy_deletes() {
        let service = service().await;
        service.create(BackupPolicy::new("temp", "Temp")).await.unwrap();
        service.delete("temp").await.unwrap();
        assert!(service.get("temp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_invalid_schedules() {
        let service = service().await;
        let err = service
            .create(BackupPolicy::new("production-standard", "dup"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let mut invalid = BackupPolicy::new("bad", "Bad");
        invalid.hourly = TierConfig {
            interval_hours: 0,
            ..TierConfig::enabled(1)
        };
        assert!(service.create(invalid).await.is_err());
    }

    #[tokio::test]
    async fn update_preserves_system_flag() {
        let service = service().await;
        let mut policy = service.get("development").await.unwrap().unwrap();
        policy.is_system = false;
        policy.daily.keep_count = 10;
        let updated = service.update(policy).await.unwrap();
        assert!(updated.is_system);
        assert_eq!(updated.daily.keep_count, 10);
    }

    #[tokio::test]
    async fn listing_puts_system_policies_first() {
        let service = service().await;
        let mut custom = BackupPolicy::new("aaa-custom", "AAA Custom");
        custom.daily = TierConfig::enabled(1);
        service.create(custom).await.unwrap();

        let policies = service.list().await.unwrap();
        assert!(policies[..3].iter().all(|p| p.is_system));
        assert_eq!(policies[3].id, "aaa-custom");
    }
}
