//! Tiered retention: the daily sweep that enforces per-tier keep counts.
//!
//! The pass snapshots each database's completed history at its start and
//! only ever deletes records from that snapshot, so backups completing
//! concurrently are never candidates.

use crate::models::audit::{AuditAction, AuditLog, AuditResourceType};
use crate::models::backup::BackupResult;
use crate::models::errors::BackupError;
use crate::models::{BackupPolicy, BackupTier, Engine};
use crate::services::audit_service::AuditService;
use crate::services::database_service::{DatabaseFilter, DatabaseService};
use crate::services::engine_service::EngineService;
use crate::services::history_service::HistoryService;
use crate::services::policy_service::PolicyService;
use crate::services::scheduler_service::resolve_effective_policy;
use crate::services::settings_service::SettingsService;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RetentionSummary {
    pub databases_examined: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

pub struct RetentionService {
    databases: Arc<DatabaseService>,
    engines: Arc<EngineService>,
    policies: Arc<PolicyService>,
    history: Arc<HistoryService>,
    settings: Arc<SettingsService>,
    audit: Arc<AuditService>,
}

impl RetentionService {
    pub fn new(
        databases: Arc<DatabaseService>,
        engines: Arc<EngineService>,
        policies: Arc<PolicyService>,
        history: Arc<HistoryService>,
        settings: Arc<SettingsService>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            databases,
            engines,
            policies,
            history,
            settings,
            audit,
        }
    }

    /// Run one retention pass over every database in the catalog. Errors on
    /// individual backups are collected; the pass always finishes.
    pub async fn run_pass(&self) -> Result<RetentionSummary, BackupError> {
        tracing::info!("Starting retention pass");

        let databases = self.databases.list(&DatabaseFilter::default()).await?;
        let fallback_policy_id = self.settings.get().await?.default_policy_id;
        let mut engine_cache: HashMap<String, Option<Engine>> = HashMap::new();
        let mut policy_cache: HashMap<String, Option<BackupPolicy>> = HashMap::new();

        let mut summary = RetentionSummary {
            databases_examined: databases.len(),
            ..Default::default()
        };

        for db in &databases {
            let policy = match resolve_effective_policy(
                db,
                &self.engines,
                &self.policies,
                &fallback_policy_id,
                &mut engine_cache,
                &mut policy_cache,
            )
            .await
            {
                Ok(Some(policy)) => policy,
                Ok(None) => {
                    summary
                        .errors
                        .push(format!("no policy resolvable for database {}", db.id));
                    continue;
                }
                Err(e) => {
                    summary
                        .errors
                        .push(format!("policy resolution failed for {}: {}", db.id, e));
                    continue;
                }
            };

            // Snapshot of this database's completed history.
            let completed = match self.history.completed_for_database(&db.id).await {
                Ok(completed) => completed,
                Err(e) => {
                    summary
                        .errors
                        .push(format!("history read failed for {}: {}", db.id, e));
                    continue;
                }
            };

            self.prune_database(&db.id, &policy, completed, &mut summary)
                .await;
        }

        tracing::info!(
            "Retention pass complete: {} databases, {} backups deleted, {} errors",
            summary.databases_examined,
            summary.deleted,
            summary.errors.len()
        );
        Ok(summary)
    }

    /// Enforce keep counts for one database. Tier-less legacy records bucket
    /// as daily. A disabled tier prunes nothing; `keep_count = 0` on an
    /// enabled tier deletes everything in the bucket.
    async fn prune_database(
        &self,
        database_id: &str,
        policy: &BackupPolicy,
        completed: Vec<BackupResult>,
        summary: &mut RetentionSummary,
    ) {
        let mut buckets: HashMap<BackupTier, Vec<BackupResult>> = HashMap::new();
        for result in completed {
            buckets.entry(result.effective_tier()).or_default().push(result);
        }

        for tier in BackupTier::ALL {
            let cfg = policy.tier(tier);
            if !cfg.enabled {
                continue;
            }
            let Some(mut bucket) = buckets.remove(&tier) else {
                continue;
            };
            bucket.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            for result in bucket.into_iter().skip(cfg.keep_count as usize) {
                match self.history.delete_with_blob(&result).await {
                    Ok(()) => {
                        summary.deleted += 1;
                        self.audit
                            .append(
                                AuditLog::system(
                                    AuditAction::BackupDeletedRetention,
                                    AuditResourceType::Backup,
                                    &result.id,
                                    &result.database_name,
                                )
                                .with_details(serde_json::json!({
                                    "database_id": database_id,
                                    "tier": tier.as_str(),
                                    "keep_count": cfg.keep_count,
                                    "policy_id": policy.id,
                                    "blob_name": result.blob_name,
                                })),
                            )
                            .await;
                    }
                    Err(e) => summary
                        .errors
                        .push(format!("failed to prune backup {}: {}", result.id, e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::backup::{BackupJob, BackupStatus, TriggeredBy};
    use crate::models::policy::TierConfig;
    use crate::models::{DatabaseConfig, EngineType};
    use crate::services::secret_service::SecretStore;
    use crate::storage::{BlobStore, TableStore};
    use crate::test_utils::create_test_pool;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use std::io::Write;

    struct Fixture {
        retention: RetentionService,
        databases: Arc<DatabaseService>,
        policies: Arc<PolicyService>,
        history: Arc<HistoryService>,
        blobs: Arc<BlobStore>,
        audit: Arc<AuditService>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let pool = create_test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(AppConfig::defaults());
        let secrets = Arc::new(SecretStore::with_key(pool.clone(), vec![2u8; 32]).unwrap());
        let catalog = TableStore::new(pool.clone(), "databaseconfigs");

        let databases = Arc::new(DatabaseService::new(
            catalog.clone(),
            secrets.clone(),
            config.clone(),
        ));
        let engines = Arc::new(EngineService::new(catalog.clone(), secrets, config.clone()));
        let policies = Arc::new(PolicyService::new(
            TableStore::new(pool.clone(), "backuppolicies"),
            catalog,
        ));
        policies.seed_default_policies().await.unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path()));
        let history = Arc::new(HistoryService::new(
            TableStore::new(pool.clone(), "backuphistory"),
            blobs.clone(),
            "backups",
        ));
        let settings = Arc::new(SettingsService::new(TableStore::new(
            pool.clone(),
            "settings",
        )));
        let audit = Arc::new(AuditService::new(TableStore::new(pool, "auditlogs")));

        let retention = RetentionService::new(
            databases.clone(),
            engines,
            policies.clone(),
            history.clone(),
            settings,
            audit.clone(),
        );

        Fixture {
            retention,
            databases,
            policies,
            history,
            blobs,
            audit,
            _dir: dir,
        }
    }

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap()
    }

    async fn add_database(fixture: &Fixture, name: &str, policy_id: &str) -> DatabaseConfig {
        let mut db = DatabaseConfig::new(name, EngineType::Mysql, "db1", 3306, name);
        db.use_engine_credentials = false;
        db.use_engine_policy = false;
        db.username = Some("backup".into());
        db.policy_id = Some(policy_id.to_string());
        fixture.databases.create(db).await.unwrap()
    }

    async fn completed_with_blob(
        fixture: &Fixture,
        database_id: &str,
        tier: Option<BackupTier>,
        at: NaiveDateTime,
    ) -> BackupResult {
        let job = BackupJob {
            id: uuid::Uuid::new_v4().to_string(),
            database_id: database_id.into(),
            database_name: database_id.into(),
            database_type: EngineType::Mysql,
            host: "db1".into(),
            port: 3306,
            target_database: database_id.into(),
            username: "backup".into(),
            password_secret_name: None,
            compression: false,
            backup_destination: None,
            triggered_by: TriggeredBy::Scheduler,
            tier,
            scheduled_at: None,
            created_at: at,
        };
        let mut result = BackupResult::for_job(&job);
        result.created_at = at;

        let blob_name = format!(
            "mysql/{}/{}.sql",
            database_id,
            at.format("%Y%m%d_%H%M%S")
        );
        let upload = fixture.blobs.begin_upload("backups", &blob_name).unwrap();
        upload.create().unwrap().write_all(b"dump").unwrap();
        let (url, size) = upload.commit().unwrap();

        result.status = BackupStatus::Completed;
        result.blob_name = Some(blob_name);
        result.blob_url = Some(url);
        result.file_size_bytes = Some(size);
        result.file_format = Some("sql".into());
        fixture.history.save(&result).await.unwrap();
        result
    }

    fn daily_keep_policy(id: &str, keep: u32) -> BackupPolicy {
        let mut policy = BackupPolicy::new(id, id);
        policy.daily = TierConfig {
            time: "02:00".into(),
            ..TierConfig::enabled(keep)
        };
        policy
    }

    #[tokio::test]
    async fn keeps_newest_n_and_deletes_the_rest() {
        let fixture = fixture().await;
        fixture.policies.create(daily_keep_policy("keep-2", 2)).await.unwrap();
        let db = add_database(&fixture, "orders", "keep-2").await;

        let mut results = Vec::new();
        for d in 1..=5 {
            results.push(
                completed_with_blob(&fixture, &db.id, Some(BackupTier::Daily), day(d)).await,
            );
        }

        let summary = fixture.retention.run_pass().await.unwrap();
        assert_eq!(summary.deleted, 3);
        assert!(summary.errors.is_empty());

        let remaining = fixture.history.completed_for_database(&db.id).await.unwrap();
        assert_eq!(remaining.len(), 2);
        // The two newest survive.
        assert_eq!(remaining[0].created_at, day(5));
        assert_eq!(remaining[1].created_at, day(4));

        // Blobs follow their records.
        for (i, result) in results.iter().enumerate() {
            let should_exist = i >= 3;
            assert_eq!(
                fixture
                    .blobs
                    .exists("backups", result.blob_name.as_deref().unwrap()),
                should_exist,
                "blob {}",
                i
            );
        }

        // Retention deletions are audited.
        let (entries, _, _) = fixture
            .audit
            .list(&crate::services::audit_service::AuditFilter::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries
            .iter()
            .all(|e| e.action == AuditAction::BackupDeletedRetention));
    }

    #[tokio::test]
    async fn keep_count_zero_on_enabled_tier_deletes_all() {
        let fixture = fixture().await;
        fixture.policies.create(daily_keep_policy("keep-0", 0)).await.unwrap();
        let db = add_database(&fixture, "orders", "keep-0").await;

        for d in 1..=3 {
            completed_with_blob(&fixture, &db.id, Some(BackupTier::Daily), day(d)).await;
        }

        let summary = fixture.retention.run_pass().await.unwrap();
        assert_eq!(summary.deleted, 3);
        assert!(fixture
            .history
            .completed_for_database(&db.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn disabled_tier_prunes_nothing() {
        let fixture = fixture().await;
        // Policy with daily disabled entirely.
        let mut policy = BackupPolicy::new("nothing-enabled", "Nothing");
        policy.daily = TierConfig {
            enabled: false,
            keep_count: 0,
            ..TierConfig::default()
        };
        fixture.policies.create(policy).await.unwrap();
        let db = add_database(&fixture, "orders", "nothing-enabled").await;

        for d in 1..=4 {
            completed_with_blob(&fixture, &db.id, Some(BackupTier::Daily), day(d)).await;
        }

        let summary = fixture.retention.run_pass().await.unwrap();
        assert_eq!(summary.deleted, 0);
        assert_eq!(
            fixture.history.completed_for_database(&db.id).await.unwrap().len(),
            4
        );
    }

    #[tokio::test]
    async fn tiers_are_pruned_independently() {
        let fixture = fixture().await;
        let mut policy = BackupPolicy::new("two-tier", "Two Tier");
        policy.hourly = TierConfig {
            interval_hours: 1,
            ..TierConfig::enabled(1)
        };
        policy.daily = TierConfig {
            time: "02:00".into(),
            ..TierConfig::enabled(2)
        };
        fixture.policies.create(policy).await.unwrap();
        let db = add_database(&fixture, "orders", "two-tier").await;

        for d in 1..=3 {
            completed_with_blob(&fixture, &db.id, Some(BackupTier::Hourly), day(d)).await;
            completed_with_blob(
                &fixture,
                &db.id,
                Some(BackupTier::Daily),
                day(d) + Duration::hours(1),
            )
            .await;
        }

        let summary = fixture.retention.run_pass().await.unwrap();
        // hourly: keep 1 of 3; daily: keep 2 of 3.
        assert_eq!(summary.deleted, 3);

        let remaining = fixture.history.completed_for_database(&db.id).await.unwrap();
        let hourly = remaining
            .iter()
            .filter(|r| r.tier == Some(BackupTier::Hourly))
            .count();
        let daily = remaining
            .iter()
            .filter(|r| r.tier == Some(BackupTier::Daily))
            .count();
        assert_eq!(hourly, 1);
        assert_eq!(daily, 2);
    }

    #[tokio::test]
    async fn manual_and_legacy_records_prune_under_the_daily_bucket() {
        let fixture = fixture().await;
        fixture.policies.create(daily_keep_policy("keep-2", 2)).await.unwrap();
        let db = add_database(&fixture, "orders", "keep-2").await;

        // Two tier-less records (manual / legacy) plus two daily records.
        completed_with_blob(&fixture, &db.id, None, day(1)).await;
        completed_with_blob(&fixture, &db.id, None, day(2)).await;
        completed_with_blob(&fixture, &db.id, Some(BackupTier::Daily), day(3)).await;
        completed_with_blob(&fixture, &db.id, Some(BackupTier::Daily), day(4)).await;

        let summary = fixture.retention.run_pass().await.unwrap();
        // All four share the daily bucket; the two newest survive.
        assert_eq!(summary.deleted, 2);

        let remaining = fixture.history.completed_for_database(&db.id).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.created_at >= day(3)));
    }

    #[tokio::test]
    async fn errors_on_one_backup_do_not_stop_the_pass() {
        let fixture = fixture().await;
        fixture.policies.create(daily_keep_policy("keep-1", 1)).await.unwrap();
        let db_a = add_database(&fixture, "orders", "keep-1").await;
        let db_b = add_database(&fixture, "billing", "keep-1").await;

        // db_a has a record whose blob url points outside the store root;
        // blob deletion for it fails.
        let mut poisoned =
            completed_with_blob(&fixture, &db_a.id, Some(BackupTier::Daily), day(1)).await;
        poisoned.blob_url = Some("file:///outside/store/root.sql".into());
        fixture.history.save(&poisoned).await.unwrap();
        completed_with_blob(&fixture, &db_a.id, Some(BackupTier::Daily), day(2)).await;

        for d in 1..=3 {
            completed_with_blob(&fixture, &db_b.id, Some(BackupTier::Daily), day(d)).await;
        }

        let summary = fixture.retention.run_pass().await.unwrap();
        assert_eq!(summary.errors.len(), 1);
        // db_b still pruned to 1.
        assert_eq!(
            fixture.history.completed_for_database(&db_b.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn fewer_backups_than_keep_count_deletes_nothing() {
        let fixture = fixture().await;
        fixture.policies.create(daily_keep_policy("keep-5", 5)).await.unwrap();
        let db = add_database(&fixture, "orders", "keep-5").await;

        for d in 1..=3 {
            completed_with_blob(&fixture, &db.id, Some(BackupTier::Daily), day(d)).await;
        }

        let summary = fixture.retention.run_pass().await.unwrap();
        assert_eq!(summary.deleted, 0);
        assert_eq!(
            fixture.history.completed_for_database(&db.id).await.unwrap().len(),
            3
        );
    }
}
