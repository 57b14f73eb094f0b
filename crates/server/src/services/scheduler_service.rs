//! Policy-driven backup scheduler.
//!
//! A tick runs every 15 minutes. Each tick is an independent idempotent pass
//! over the enabled databases: the first tier whose schedule predicate fires
//! produces exactly one job for that database, and evaluation stops there so
//! a database can never queue more than one backup per tick.

use crate::config::AppConfig;
use crate::models::backup::{BackupJob, TriggeredBy};
use crate::models::errors::BackupError;
use crate::models::policy::TierConfig;
use crate::models::{BackupPolicy, BackupTier, DatabaseConfig, Engine};
use crate::services::database_service::{DatabaseFilter, DatabaseService};
use crate::services::engine_service::EngineService;
use crate::services::history_service::HistoryService;
use crate::services::policy_service::PolicyService;
use crate::services::retention_service::RetentionService;
use crate::services::settings_service::SettingsService;
use crate::storage::JobQueue;
use crate::utils::now_utc;
use chrono::{Datelike, Duration, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

/// What one tick did, for logging.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub evaluated: usize,
    pub enqueued: usize,
    pub skipped_errors: usize,
}

pub struct SchedulerService {
    databases: Arc<DatabaseService>,
    engines: Arc<EngineService>,
    policies: Arc<PolicyService>,
    history: Arc<HistoryService>,
    settings: Arc<SettingsService>,
    queue: Arc<JobQueue>,
}

/// Resolve the policy that governs a database: the engine's policy when the
/// database inherits it, else the database's own, else the configured
/// fallback. A dangling policy reference also falls back.
pub(crate) async fn resolve_effective_policy(
    db: &DatabaseConfig,
    engines: &EngineService,
    policies: &PolicyService,
    fallback_policy_id: &str,
    engine_cache: &mut HashMap<String, Option<Engine>>,
    policy_cache: &mut HashMap<String, Option<BackupPolicy>>,
) -> Result<Option<BackupPolicy>, BackupError> {
    let mut policy_id: Option<String> = None;

    if db.use_engine_policy {
        if let Some(engine_id) = &db.engine_id {
            let engine = match engine_cache.get(engine_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = engines.get(engine_id).await?;
                    engine_cache.insert(engine_id.clone(), loaded.clone());
                    loaded
                }
            };
            policy_id = engine.and_then(|e| e.policy_id);
        }
    }
    if policy_id.is_none() {
        policy_id = db.policy_id.clone();
    }
    let policy_id = policy_id.unwrap_or_else(|| fallback_policy_id.to_string());

    let policy = match policy_cache.get(&policy_id) {
        Some(cached) => cached.clone(),
        None => {
            let loaded = policies.get(&policy_id).await?;
            policy_cache.insert(policy_id.clone(), loaded.clone());
            loaded
        }
    };

    if policy.is_some() {
        return Ok(policy);
    }

    // Referenced policy is gone; fall back explicitly.
    let fallback = match policy_cache.get(fallback_policy_id) {
        Some(cached) => cached.clone(),
        None => {
            let loaded = policies.get(fallback_policy_id).await?;
            policy_cache.insert(fallback_policy_id.to_string(), loaded.clone());
            loaded
        }
    };
    Ok(fallback)
}

impl SchedulerService {
    pub fn new(
        databases: Arc<DatabaseService>,
        engines: Arc<EngineService>,
        policies: Arc<PolicyService>,
        history: Arc<HistoryService>,
        settings: Arc<SettingsService>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            databases,
            engines,
            policies,
            history,
            settings,
            queue,
        }
    }

    /// The tier schedule predicate.
    ///
    /// A database with no prior completed backup in the tier always fires
    /// (catch-up on first run). The scheduled instant itself fires: the lower
    /// bound is inclusive.
    pub fn should_run(
        tier: BackupTier,
        cfg: &TierConfig,
        last: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> bool {
        let Some(last) = last else {
            return true;
        };

        match tier {
            BackupTier::Hourly => now - last >= Duration::hours(i64::from(cfg.interval_hours)),
            BackupTier::Daily => Self::daily_due(cfg, last, now),
            BackupTier::Weekly => {
                // Normalize chrono's Monday-zero weekday so Sunday = 0.
                let dow = (now.weekday().num_days_from_monday() + 1) % 7;
                if dow != u32::from(cfg.day_of_week) {
                    return false;
                }
                Self::daily_due(cfg, last, now)
            }
            BackupTier::Monthly => {
                if now.day() != u32::from(cfg.day_of_month) {
                    return false;
                }
                Self::daily_due(cfg, last, now)
            }
            BackupTier::Yearly => {
                if now.month() != u32::from(cfg.month) || now.day() != u32::from(cfg.day_of_month) {
                    return false;
                }
                Self::daily_due(cfg, last, now)
            }
        }
    }

    fn daily_due(cfg: &TierConfig, last: NaiveDateTime, now: NaiveDateTime) -> bool {
        let Some(time) = cfg.scheduled_time() else {
            return false;
        };
        let today_scheduled = now.date().and_time(time);
        now >= today_scheduled && last < today_scheduled
    }

    /// One scheduler pass at the current time.
    pub async fn run_tick(&self) -> Result<TickSummary, BackupError> {
        self.run_tick_at(now_utc()).await
    }

    /// One scheduler pass with an injected `now`. Per-database failures are
    /// logged and skipped; the tick always finishes.
    pub async fn run_tick_at(&self, now: NaiveDateTime) -> Result<TickSummary, BackupError> {
        let databases = self
            .databases
            .list(&DatabaseFilter {
                enabled_only: true,
                ..Default::default()
            })
            .await?;

        let fallback_policy_id = self.settings.get().await?.default_policy_id;
        let mut engine_cache: HashMap<String, Option<Engine>> = HashMap::new();
        let mut policy_cache: HashMap<String, Option<BackupPolicy>> = HashMap::new();

        let mut summary = TickSummary {
            evaluated: databases.len(),
            ..Default::default()
        };

        for db in &databases {
            match self
                .evaluate_database(db, now, &fallback_policy_id, &mut engine_cache, &mut policy_cache)
                .await
            {
                Ok(Some(job)) => {
                    let message = job.to_queue_message()?;
                    self.queue.enqueue(&message).await?;
                    summary.enqueued += 1;
                    tracing::info!(
                        "Enqueued {} backup for {} ({})",
                        job.tier.map(|t| t.as_str()).unwrap_or("manual"),
                        db.name,
                        db.id
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    summary.skipped_errors += 1;
                    tracing::error!("Scheduler skipped database {} ({}): {}", db.name, db.id, e);
                }
            }
        }

        tracing::info!(
            "Scheduler tick: {} databases evaluated, {} jobs enqueued, {} errors",
            summary.evaluated,
            summary.enqueued,
            summary.skipped_errors
        );
        Ok(summary)
    }

    async fn evaluate_database(
        &self,
        db: &DatabaseConfig,
        now: NaiveDateTime,
        fallback_policy_id: &str,
        engine_cache: &mut HashMap<String, Option<Engine>>,
        policy_cache: &mut HashMap<String, Option<BackupPolicy>>,
    ) -> Result<Option<BackupJob>, BackupError> {
        let Some(policy) = resolve_effective_policy(
            db,
            &self.engines,
            &self.policies,
            fallback_policy_id,
            engine_cache,
            policy_cache,
        )
        .await?
        else {
            return Err(BackupError::Scheduler(format!(
                "no policy resolvable for database {} (fallback '{}' missing)",
                db.id, fallback_policy_id
            )));
        };

        // Fixed tier order; the first tier that fires wins this tick.
        let mut due_tier = None;
        for tier in BackupTier::ALL {
            let cfg = policy.tier(tier);
            if !cfg.enabled {
                continue;
            }
            let last = self
                .history
                .last_completed(&db.id, tier)
                .await?
                .map(|r| r.created_at);
            if Self::should_run(tier, cfg, last, now) {
                due_tier = Some(tier);
                break;
            }
        }
        let Some(tier) = due_tier else {
            return Ok(None);
        };

        let Some((username, password_secret_name)) =
            self.resolve_credentials(db, engine_cache).await?
        else {
            return Err(BackupError::Credential(format!(
                "no username resolvable for database {}",
                db.id
            )));
        };

        Ok(Some(BackupJob {
            id: uuid::Uuid::new_v4().to_string(),
            database_id: db.id.clone(),
            database_name: db.name.clone(),
            database_type: db.database_type,
            host: db.host.clone(),
            port: db.port,
            target_database: db.database_name.clone(),
            username,
            password_secret_name,
            compression: db.compression,
            backup_destination: db.backup_destination.clone(),
            triggered_by: TriggeredBy::Scheduler,
            tier: Some(tier),
            scheduled_at: Some(now),
            created_at: now,
        }))
    }

    /// Pick the credential source: the engine when the database inherits,
    /// the database row otherwise. Returns None when no username resolves.
    async fn resolve_credentials(
        &self,
        db: &DatabaseConfig,
        engine_cache: &mut HashMap<String, Option<Engine>>,
    ) -> Result<Option<(String, Option<String>)>, BackupError> {
        if db.use_engine_credentials {
            if let Some(engine_id) = &db.engine_id {
                let engine = match engine_cache.get(engine_id) {
                    Some(cached) => cached.clone(),
                    None => {
                        let loaded = self.engines.get(engine_id).await?;
                        engine_cache.insert(engine_id.clone(), loaded.clone());
                        loaded
                    }
                };
                if let Some(engine) = engine {
                    if let Some(username) = engine.username {
                        return Ok(Some((username, engine.password_secret_name)));
                    }
                }
            }
            return Ok(None);
        }

        match &db.username {
            Some(username) => Ok(Some((username.clone(), db.password_secret_name.clone()))),
            None => Ok(None),
        }
    }

    /// Enqueue a manual backup for one database (tier-less job).
    pub async fn enqueue_manual(&self, database_id: &str) -> Result<BackupJob, BackupError> {
        let db = self
            .databases
            .get(database_id)
            .await?
            .ok_or_else(|| BackupError::not_found("Database", database_id))?;

        let mut engine_cache = HashMap::new();
        let Some((username, password_secret_name)) =
            self.resolve_credentials(&db, &mut engine_cache).await?
        else {
            return Err(BackupError::Credential(format!(
                "no username resolvable for database {}",
                db.id
            )));
        };

        let now = now_utc();
        let job = BackupJob {
            id: uuid::Uuid::new_v4().to_string(),
            database_id: db.id.clone(),
            database_name: db.name.clone(),
            database_type: db.database_type,
            host: db.host.clone(),
            port: db.port,
            target_database: db.database_name.clone(),
            username,
            password_secret_name,
            compression: db.compression,
            backup_destination: db.backup_destination.clone(),
            triggered_by: TriggeredBy::Manual,
            tier: None,
            scheduled_at: Some(now),
            created_at: now,
        };
        self.queue.enqueue(&job.to_queue_message()?).await?;
        tracing::info!("Enqueued manual backup for {} ({})", db.name, db.id);
        Ok(job)
    }
}

/// Wire the recurring jobs: the scheduler tick and the daily retention pass.
pub async fn start_schedulers(
    scheduler: Arc<SchedulerService>,
    retention: Arc<RetentionService>,
    config: Arc<AppConfig>,
) -> Result<JobScheduler, BackupError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| BackupError::Scheduler(e.to_string()))?;

    let tick_job = {
        let scheduler = scheduler.clone();
        Job::new_async(config.scheduler_cron.as_str(), move |_uuid, _lock| {
            let scheduler = scheduler.clone();
            Box::pin(async move {
                if let Err(e) = scheduler.run_tick().await {
                    tracing::error!("Scheduler tick failed: {}", e);
                }
            })
        })
        .map_err(|e| BackupError::Scheduler(e.to_string()))?
    };
    sched
        .add(tick_job)
        .await
        .map_err(|e| BackupError::Scheduler(e.to_string()))?;

    let retention_job = {
        let retention = retention.clone();
        Job::new_async(config.retention_cron.as_str(), move |_uuid, _lock| {
            let retention = retention.clone();
            Box::pin(async move {
                if let Err(e) = retention.run_pass().await {
                    tracing::error!("Retention pass failed: {}", e);
                }
            })
        })
        .map_err(|e| BackupError::Scheduler(e.to_string()))?
    };
    sched
        .add(retention_job)
        .await
        .map_err(|e| BackupError::Scheduler(e.to_string()))?;

    sched
        .start()
        .await
        .map_err(|e| BackupError::Scheduler(e.to_string()))?;

    tracing::info!(
        "Schedulers started (tick: '{}', retention: '{}')",
        config.scheduler_cron,
        config.retention_cron
    );
    Ok(sched)
}
