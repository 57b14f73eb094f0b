//! Worker pool: pulls backup jobs off the queue and drives the pipeline.
//!
//! At-least-once semantics: a worker that dies mid-job never deletes the
//! message, so it reappears after the visibility timeout with a bumped
//! dequeue count. Retry timing is owned entirely by the queue; the worker
//! only decides when a message has gone poison.

use crate::config::AppConfig;
use crate::models::audit::{AuditAction, AuditLog, AuditResourceType};
use crate::models::backup::{BackupJob, BackupResult};
use crate::models::errors::BackupError;
use crate::services::audit_service::AuditService;
use crate::services::backup_service::BackupService;
use crate::services::history_service::HistoryService;
use crate::storage::{JobQueue, QueueMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    history: Arc<HistoryService>,
    pipeline: Arc<BackupService>,
    audit: Arc<AuditService>,
    config: Arc<AppConfig>,
}

/// Handle to the running pool; dropping it does not stop the workers, call
/// `shutdown`.
pub struct WorkerHandles {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandles {
    /// Signal shutdown and wait for every worker to finish its current
    /// message. In-flight dumps are killed at the pipeline's cancellation
    /// point.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        history: Arc<HistoryService>,
        pipeline: Arc<BackupService>,
        audit: Arc<AuditService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            queue,
            history,
            pipeline,
            audit,
            config,
        }
    }

    /// Spawn the configured number of long-lived workers.
    pub fn start(self: &Arc<Self>) -> WorkerHandles {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            let pool = self.clone();
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id, rx).await;
            }));
        }
        tracing::info!("Started {} backup workers", self.config.worker_count);
        WorkerHandles {
            shutdown_tx,
            handles,
        }
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        let visibility = Duration::from_secs(self.config.visibility_timeout_secs);
        let poll_interval = Duration::from_secs(self.config.queue_poll_interval_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let messages = match self.queue.receive(1, visibility).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!("Worker {}: queue receive failed: {}", worker_id, e);
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };

            match messages.into_iter().next() {
                Some(message) => {
                    self.process_message(message, &mut shutdown).await;
                }
                None => {
                    // Idle; wake up on the next poll or on shutdown.
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        tracing::info!("Worker {} stopped", worker_id);
    }

    /// Process one leased message through its full result lifecycle.
    pub async fn process_message(&self, message: QueueMessage, shutdown: &mut watch::Receiver<bool>) {
        let job = match BackupJob::from_queue_message(&message.content) {
            Ok(job) => job,
            Err(e) => {
                // Unparseable messages can never succeed; drop them.
                tracing::error!("Failed to parse backup job {}: {}", message.id, e);
                let _ = self.queue.delete(&message.id, &message.pop_receipt).await;
                return;
            }
        };

        tracing::info!(
            "Processing backup job {} for {} ({}) on {}:{}",
            job.id,
            job.database_name,
            job.database_type,
            job.host,
            job.port
        );

        // The pending record is the "started" marker; its created_at fixes
        // the row key for every later write.
        let mut result = BackupResult::for_job(&job);
        if let Err(e) = self.history.save(&result).await {
            // Without a history record the attempt is invisible; leave the
            // message for a retry.
            tracing::error!("Failed to persist pending result for {}: {}", job.id, e);
            return;
        }

        result.mark_started();
        if let Err(e) = self.history.save(&result).await {
            tracing::error!("Failed to persist in_progress result for {}: {}", job.id, e);
        }

        // Cancellation point between stages: bail before launching the dump.
        if *shutdown.borrow() {
            result.mark_cancelled();
            let _ = self.history.save(&result).await;
            return;
        }

        match self.pipeline.execute(&job, shutdown).await {
            Ok(artifact) => {
                result.mark_completed(
                    artifact.blob_name,
                    artifact.blob_url,
                    artifact.file_size_bytes,
                    artifact.file_format,
                );
                if let Err(e) = self.history.save(&result).await {
                    tracing::error!("Failed to persist completed result for {}: {}", job.id, e);
                }
                if !self.queue.delete(&message.id, &message.pop_receipt).await.unwrap_or(false) {
                    tracing::warn!(
                        "Completed job {} but its lease had expired; a duplicate run may follow",
                        job.id
                    );
                }
                self.audit
                    .append(
                        AuditLog::system(
                            AuditAction::BackupCompleted,
                            AuditResourceType::Backup,
                            &result.id,
                            &job.database_name,
                        )
                        .with_details(serde_json::json!({
                            "database_id": job.database_id,
                            "tier": job.tier.map(|t| t.as_str()),
                            "blob_name": result.blob_name,
                            "file_size_bytes": result.file_size_bytes,
                        })),
                    )
                    .await;
            }
            Err(BackupError::Cancelled) => {
                // Shutdown mid-dump. Leave the message; the job re-runs after
                // restart.
                tracing::warn!("Backup job {} cancelled by shutdown", job.id);
                result.mark_cancelled();
                let _ = self.history.save(&result).await;
            }
            Err(e) => {
                let poison = message.dequeue_count >= self.config.poison_threshold;
                result.retry_count = message.dequeue_count;
                let error_message = if poison {
                    format!("{} (poison threshold reached)", e.detail_message())
                } else {
                    e.detail_message()
                };
                result.mark_failed(error_message, Some(e.kind().to_string()));
                if let Err(save_err) = self.history.save(&result).await {
                    tracing::error!("Failed to persist failed result for {}: {}", job.id, save_err);
                }

                tracing::error!(
                    "Backup failed for {} (attempt {}): {}",
                    job.database_name,
                    message.dequeue_count,
                    e
                );

                if poison {
                    // No further retries: the queue's visibility mechanism is
                    // done with this message.
                    let _ = self.queue.delete(&message.id, &message.pop_receipt).await;
                    self.audit
                        .append(
                            AuditLog::system(
                                AuditAction::BackupFailed,
                                AuditResourceType::Backup,
                                &result.id,
                                &job.database_name,
                            )
                            .failed(e.to_string())
                            .with_details(serde_json::json!({
                                "database_id": job.database_id,
                                "dequeue_count": message.dequeue_count,
                                "error_kind": e.kind(),
                            })),
                        )
                        .await;
                }
                // Otherwise the message stays leased until the visibility
                // timeout expires and retries on its own.
            }
        }
    }
}
