//! End-to-end scenarios exercising the scheduler, queue, worker pool, and
//! retention pass together against in-memory storage and a fake dump engine.

use crate::config::AppConfig;
use crate::models::backup::{BackupJob, BackupStatus, TriggeredBy};
use crate::models::errors::BackupError;
use crate::models::policy::TierConfig;
use crate::models::{BackupPolicy, BackupTier, DatabaseConfig, EngineType};
use crate::services::backup_engines::{BackupEngine, ConnectionInfo};
use crate::services::database_service::DatabaseService;
use crate::services::engine_service::EngineService;
use crate::services::history_service::HistoryFilter;
use crate::services::{
    AuditService, BackupService, HistoryService, PolicyService, RetentionService, SchedulerService,
    SecretStore, SettingsService, WorkerPool,
};
use crate::storage::{BlobStore, JobQueue, TableStore};
use crate::test_utils::create_test_pool;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;

struct CannedDumpEngine;

#[async_trait]
impl BackupEngine for CannedDumpEngine {
    fn database_type(&self) -> EngineType {
        EngineType::Mysql
    }
    fn file_extension(&self) -> &'static str {
        "sql"
    }
    async fn execute_backup(
        &self,
        _conn: &ConnectionInfo,
        sink: &mut (dyn Write + Send),
        _timeout: StdDuration,
        _shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BackupError> {
        sink.write_all(b"-- canned dump\n")
            .map_err(|e| BackupError::Storage(e.to_string()))?;
        Ok(())
    }
}

struct AccessDeniedEngine;

#[async_trait]
impl BackupEngine for AccessDeniedEngine {
    fn database_type(&self) -> EngineType {
        EngineType::Mysql
    }
    fn file_extension(&self) -> &'static str {
        "sql"
    }
    async fn execute_backup(
        &self,
        _conn: &ConnectionInfo,
        _sink: &mut (dyn Write + Send),
        _timeout: StdDuration,
        _shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BackupError> {
        Err(BackupError::Execution {
            message: "mysqldump exited with status 2".into(),
            stderr: "Access denied for user 'backup'@'%'".into(),
        })
    }
}

fn canned_registry(_: EngineType) -> &'static dyn BackupEngine {
    &CannedDumpEngine
}

fn denied_registry(_: EngineType) -> &'static dyn BackupEngine {
    &AccessDeniedEngine
}

struct World {
    databases: Arc<DatabaseService>,
    policies: Arc<PolicyService>,
    history: Arc<HistoryService>,
    queue: Arc<JobQueue>,
    scheduler: SchedulerService,
    workers: Arc<WorkerPool>,
    retention: RetentionService,
    blobs: Arc<BlobStore>,
    config: Arc<AppConfig>,
    _dir: tempfile::TempDir,
}

async fn world(registry: fn(EngineType) -> &'static dyn BackupEngine) -> World {
    let pool = create_test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(AppConfig::defaults());
    let secrets = Arc::new(SecretStore::with_key(pool.clone(), vec![6u8; 32]).unwrap());
    let catalog = TableStore::new(pool.clone(), "databaseconfigs");

    let databases = Arc::new(DatabaseService::new(
        catalog.clone(),
        secrets.clone(),
        config.clone(),
    ));
    let engines = Arc::new(EngineService::new(
        catalog.clone(),
        secrets.clone(),
        config.clone(),
    ));
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
    let audit = Arc::new(AuditService::new(TableStore::new(pool.clone(), "auditlogs")));
    let queue = Arc::new(JobQueue::new(pool, "backup-jobs"));

    let pipeline = Arc::new(
        BackupService::new(
            secrets.clone(),
            databases.clone(),
            engines.clone(),
            blobs.clone(),
            config.clone(),
        )
        .with_registry(registry),
    );
    let workers = Arc::new(WorkerPool::new(
        queue.clone(),
        history.clone(),
        pipeline,
        audit.clone(),
        config.clone(),
    ));
    let scheduler = SchedulerService::new(
        databases.clone(),
        engines.clone(),
        policies.clone(),
        history.clone(),
        settings.clone(),
        queue.clone(),
    );
    let retention = RetentionService::new(
        databases.clone(),
        engines.clone(),
        policies.clone(),
        history.clone(),
        settings,
        audit,
    );

    World {
        databases,
        policies,
        history,
        queue,
        scheduler,
        workers,
        retention,
        blobs,
        config,
        _dir: dir,
    }
}

fn dt(d: u32, h: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap()
}

async fn add_database(world: &World, name: &str, policy_id: &str) -> DatabaseConfig {
    let mut db = DatabaseConfig::new(name, EngineType::Mysql, "db1", 3306, name);
    db.use_engine_credentials = false;
    db.use_engine_policy = false;
    db.username = Some("backup".into());
    db.password = Some("pw".into());
    db.policy_id = Some(policy_id.to_string());
    world.databases.create(db).await.unwrap()
}

/// Run workers over every currently queued message exactly once.
async fn drain_queue(world: &World) {
    let (_tx, mut rx) = watch::channel(false);
    loop {
        let messages = world
            .queue
            .receive(1, StdDuration::from_secs(60))
            .await
            .unwrap();
        let Some(message) = messages.into_iter().next() else {
            break;
        };
        world.workers.process_message(message, &mut rx).await;
    }
}

fn hourly_policy(id: &str, keep: u32) -> BackupPolicy {
    let mut policy = BackupPolicy::new(id, id);
    policy.hourly = TierConfig {
        interval_hours: 1,
        ..TierConfig::enabled(keep)
    };
    policy
}

// Scenario: hourly tier on a fresh database, across a simulated morning.
#[tokio::test]
async fn hourly_backups_accumulate_and_stay_within_retention() {
    let world = world(canned_registry).await;
    world
        .policies
        .create(hourly_policy("hourly-keep-3", 3))
        .await
        .unwrap();
    let db = add_database(&world, "orders", "hourly-keep-3").await;

    // t=0: fresh database fires.
    let summary = world.scheduler.run_tick_at(dt(5, 9, 0)).await.unwrap();
    assert_eq!(summary.enqueued, 1);
    drain_queue(&world).await;

    // +45min: nothing due. The completed result carries the wall clock's
    // created_at rather than the simulated tick time, so check the predicate
    // against the recorded timestamp directly.
    let last = world
        .history
        .last_completed(&db.id, BackupTier::Hourly)
        .await
        .unwrap()
        .unwrap();
    let cfg = TierConfig {
        interval_hours: 1,
        ..TierConfig::enabled(3)
    };
    assert!(!SchedulerService::should_run(
        BackupTier::Hourly,
        &cfg,
        Some(last.created_at),
        last.created_at + Duration::minutes(45)
    ));
    // +60min: due again.
    assert!(SchedulerService::should_run(
        BackupTier::Hourly,
        &cfg,
        Some(last.created_at),
        last.created_at + Duration::hours(1)
    ));

    let (results, total, _) = world
        .history
        .list_paged(&HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(results[0].status, BackupStatus::Completed);
    assert!(world
        .blobs
        .exists("backups", results[0].blob_name.as_deref().unwrap()));

    // Retention with three or fewer completed backups deletes nothing.
    let summary = world.retention.run_pass().await.unwrap();
    assert_eq!(summary.deleted, 0);
}

// Scenario: a tick enqueues at most one job per database even when every
// tier is due, and a second tick right after enqueues nothing new.
#[tokio::test]
async fn one_job_per_database_per_tick() {
    let world = world(canned_registry).await;
    add_database(&world, "orders", "production-critical").await;
    add_database(&world, "billing", "production-critical").await;

    let summary = world.scheduler.run_tick_at(dt(9, 2, 0)).await.unwrap();
    assert_eq!(summary.evaluated, 2);
    assert_eq!(summary.enqueued, 2);
    assert_eq!(world.queue.depth().await.unwrap(), 2);

    drain_queue(&world).await;

    let (results, total, _) = world
        .history
        .list_paged(&HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(total, 2);
    // Hourly won the tier race for both databases.
    assert!(results.iter().all(|r| r.tier == Some(BackupTier::Hourly)));
}

// Scenario: manual trigger while a scheduled job is already queued; both run
// and retention buckets the manual (tier-less) result as daily.
#[tokio::test]
async fn manual_trigger_coexists_with_scheduled_backlog() {
    let world = world(canned_registry).await;
    world
        .policies
        .create(hourly_policy("hourly-keep-3", 3))
        .await
        .unwrap();
    let db = add_database(&world, "orders", "hourly-keep-3").await;

    world.scheduler.run_tick_at(dt(5, 9, 0)).await.unwrap();
    world.scheduler.enqueue_manual(&db.id).await.unwrap();
    assert_eq!(world.queue.depth().await.unwrap(), 2);

    drain_queue(&world).await;

    let (results, total, _) = world
        .history
        .list_paged(&HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(results.iter().all(|r| r.status == BackupStatus::Completed));

    let manual = results
        .iter()
        .find(|r| r.triggered_by == TriggeredBy::Manual)
        .unwrap();
    assert_eq!(manual.tier, None);
    assert_eq!(manual.effective_tier(), BackupTier::Daily);
}

// Scenario: dump tool failure retries through the queue until the poison
// threshold, then the message disappears for good.
#[tokio::test]
async fn failing_dump_retries_until_poison() {
    let world = world(denied_registry).await;
    world
        .policies
        .create(hourly_policy("hourly-keep-3", 3))
        .await
        .unwrap();
    add_database(&world, "orders", "hourly-keep-3").await;

    world.scheduler.run_tick_at(dt(5, 9, 0)).await.unwrap();

    let (_tx, mut rx) = watch::channel(false);
    let threshold = world.config.poison_threshold;
    for attempt in 1..=threshold {
        let message = world
            .queue
            .receive(1, StdDuration::from_secs(0))
            .await
            .unwrap()
            .into_iter()
            .next()
            .expect("message should still be retryable");
        assert_eq!(message.dequeue_count, attempt);
        world.workers.process_message(message, &mut rx).await;
    }

    // Poison: gone from the queue.
    assert_eq!(world.queue.depth().await.unwrap(), 0);

    let (results, _, _) = world
        .history
        .list_paged(&HistoryFilter {
            status: Some(BackupStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    let final_result = results
        .iter()
        .max_by_key(|r| r.retry_count)
        .unwrap();
    assert_eq!(final_result.retry_count, threshold);
    assert!(final_result
        .error_message
        .as_deref()
        .unwrap()
        .contains("Access denied"));
    assert_eq!(
        final_result.error_details.as_deref(),
        Some("BackupExecutionError")
    );
}

// Scenario: retention prune keeps the newest N per tier and removes blobs
// together with their records.
#[tokio::test]
async fn retention_prunes_history_and_blobs_together() {
    let world = world(canned_registry).await;
    let mut policy = BackupPolicy::new("daily-keep-2", "Daily Keep 2");
    policy.daily = TierConfig {
        time: "02:00".into(),
        ..TierConfig::enabled(2)
    };
    world.policies.create(policy).await.unwrap();
    let db = add_database(&world, "orders", "daily-keep-2").await;

    // Five completed daily backups on consecutive days.
    for d in 1..=5 {
        let mut result = crate::models::backup::BackupResult::for_job(&BackupJob {
            id: uuid::Uuid::new_v4().to_string(),
            database_id: db.id.clone(),
            database_name: db.name.clone(),
            database_type: EngineType::Mysql,
            host: "db1".into(),
            port: 3306,
            target_database: "orders".into(),
            username: "backup".into(),
            password_secret_name: None,
            compression: false,
            backup_destination: None,
            triggered_by: TriggeredBy::Scheduler,
            tier: Some(BackupTier::Daily),
            scheduled_at: None,
            created_at: dt(d, 2, 0),
        });
        result.created_at = dt(d, 2, 0);
        let blob_name = format!("mysql/{}/2024060{}_020000.sql", db.id, d);
        let upload = world.blobs.begin_upload("backups", &blob_name).unwrap();
        upload.create().unwrap().write_all(b"dump").unwrap();
        let (url, size) = upload.commit().unwrap();
        result.status = BackupStatus::Completed;
        result.blob_name = Some(blob_name);
        result.blob_url = Some(url);
        result.file_size_bytes = Some(size);
        world.history.save(&result).await.unwrap();
    }

    let summary = world.retention.run_pass().await.unwrap();
    assert_eq!(summary.deleted, 3);

    let remaining = world.history.completed_for_database(&db.id).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].created_at, dt(5, 2, 0));
    assert_eq!(remaining[1].created_at, dt(4, 2, 0));

    for result in &remaining {
        assert!(world
            .blobs
            .exists("backups", result.blob_name.as_deref().unwrap()));
    }
    // The three oldest blobs are gone.
    for d in 1..=3 {
        assert!(!world
            .blobs
            .exists("backups", &format!("mysql/{}/2024060{}_020000.sql", db.id, d)));
    }
}

// Scenario: deleting a system policy is rejected; a policy in use reports
// the referencing database count.
#[tokio::test]
async fn policy_delete_protections() {
    let world = world(canned_registry).await;
    let err = world
        .policies
        .delete("production-critical")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "System policies cannot be deleted");

    world
        .policies
        .create(hourly_policy("custom", 2))
        .await
        .unwrap();
    add_database(&world, "a", "custom").await;
    add_database(&world, "b", "custom").await;

    let err = world.policies.delete("custom").await.unwrap_err();
    assert_eq!(err.to_string(), "Policy is in use by 2 database(s)");
}

// Listing invariant: results always come back newest-first.
#[tokio::test]
async fn history_listing_is_reverse_chronological() {
    let world = world(canned_registry).await;
    world
        .policies
        .create(hourly_policy("hourly-keep-3", 3))
        .await
        .unwrap();
    add_database(&world, "orders", "hourly-keep-3").await;

    world.scheduler.run_tick_at(dt(5, 9, 0)).await.unwrap();
    drain_queue(&world).await;
    world.scheduler.enqueue_manual(
        &world
            .databases
            .list(&Default::default())
            .await
            .unwrap()[0]
            .id,
    )
    .await
    .unwrap();
    drain_queue(&world).await;

    let (results, _, _) = world
        .history
        .list_paged(&HistoryFilter::default())
        .await
        .unwrap();
    assert!(results.len() >= 2);
    assert!(results
        .windows(2)
        .all(|w| w[0].created_at >= w[1].created_at));
}
