//! The backup pipeline: credential resolution, dump execution, optional
//! streaming compression, and atomic upload.

use crate::config::AppConfig;
use crate::models::backup::BackupJob;
use crate::models::errors::BackupError;
use crate::models::EngineType;
use crate::services::backup_engines::{self, BackupEngine, ConnectionInfo};
use crate::services::database_service::DatabaseService;
use crate::services::engine_service::EngineService;
use crate::services::secret_service::SecretStore;
use crate::storage::blob_store::BlobUpload;
use crate::storage::BlobStore;
use crate::utils::now_utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What a successful pipeline run hands back to the worker.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub blob_name: String,
    pub blob_url: String,
    pub file_size_bytes: u64,
    pub file_format: String,
}

/// MIME type for an artifact format.
pub fn content_type(file_format: &str) -> &'static str {
    if file_format.ends_with(".gz") {
        "application/gzip"
    } else {
        "application/sql"
    }
}

/// Streaming sink for dump bytes: optionally gzips on the way to the staged
/// blob file. Nothing is buffered beyond the encoder's internal block.
enum SinkInner {
    Plain(File),
    Gzip(GzEncoder<File>),
}

pub struct ArtifactWriter {
    inner: Option<SinkInner>,
    upload: Option<BlobUpload>,
}

impl ArtifactWriter {
    fn new(upload: BlobUpload, compress: bool) -> Result<Self, BackupError> {
        let file = upload.create()?;
        let inner = if compress {
            SinkInner::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            SinkInner::Plain(file)
        };
        Ok(Self {
            inner: Some(inner),
            upload: Some(upload),
        })
    }

    /// Finish the stream and publish the blob. Returns `(url, size_bytes)`.
    fn commit(mut self) -> Result<(String, u64), BackupError> {
        let inner = self
            .inner
            .take()
            .ok_or_else(|| BackupError::Storage("artifact writer already finished".into()))?;
        let file = match inner {
            SinkInner::Plain(file) => file,
            SinkInner::Gzip(encoder) => encoder
                .finish()
                .map_err(|e| BackupError::Compression(e.to_string()))?,
        };
        file.sync_all()?;
        drop(file);

        let upload = self
            .upload
            .take()
            .ok_or_else(|| BackupError::Storage("artifact writer already finished".into()))?;
        upload.commit()
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.inner.as_mut() {
            Some(SinkInner::Plain(file)) => file.write(buf),
            Some(SinkInner::Gzip(encoder)) => encoder.write(buf),
            None => Err(std::io::Error::other("artifact writer finished")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.inner.as_mut() {
            Some(SinkInner::Plain(file)) => file.flush(),
            Some(SinkInner::Gzip(encoder)) => encoder.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        // A writer dropped without commit leaves no partial blob behind.
        self.inner.take();
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
    }
}

pub struct BackupService {
    secrets: Arc<SecretStore>,
    databases: Arc<DatabaseService>,
    engine_catalog: Arc<EngineService>,
    blobs: Arc<BlobStore>,
    config: Arc<AppConfig>,
    registry: fn(EngineType) -> &'static dyn BackupEngine,
}

impl BackupService {
    pub fn new(
        secrets: Arc<SecretStore>,
        databases: Arc<DatabaseService>,
        engine_catalog: Arc<EngineService>,
        blobs: Arc<BlobStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            secrets,
            databases,
            engine_catalog,
            blobs,
            config,
            registry: backup_engines::engine_for,
        }
    }

    /// Swap the engine registry. Tests use this to avoid real dump tools.
    pub fn with_registry(mut self, registry: fn(EngineType) -> &'static dyn BackupEngine) -> Self {
        self.registry = registry;
        self
    }

    /// Run the full pipeline for one job.
    pub async fn execute(
        &self,
        job: &BackupJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<BackupArtifact, BackupError> {
        let password = self.resolve_password(job).await?;

        let engine = (self.registry)(job.database_type);
        let compress = job.compression && engine.supports_compression();
        let file_format = if compress {
            format!("{}.gz", engine.file_extension())
        } else {
            engine.file_extension().to_string()
        };

        let timestamp = now_utc().format("%Y%m%d_%H%M%S");
        let blob_name = format!(
            "{}/{}/{}.{}",
            job.database_type, job.database_id, timestamp, file_format
        );
        let container = job
            .backup_destination
            .as_deref()
            .unwrap_or(&self.config.backup_container_name);

        let upload = self.blobs.begin_upload(container, &blob_name)?;
        let mut writer = ArtifactWriter::new(upload, compress)?;

        let conn = ConnectionInfo {
            host: job.host.clone(),
            port: job.port,
            database: job.target_database.clone(),
            username: job.username.clone(),
            password,
        };
        let timeout = Duration::from_secs(self.config.dump_timeout_secs);

        engine
            .execute_backup(&conn, &mut writer, timeout, shutdown)
            .await?;

        let (blob_url, file_size_bytes) = writer.commit()?;
        tracing::info!(
            "Backup completed for {}: {} ({} bytes)",
            job.database_name,
            blob_name,
            file_size_bytes
        );

        Ok(BackupArtifact {
            blob_name,
            blob_url,
            file_size_bytes,
            file_format,
        })
    }

    /// Resolve the password for a job: the secret store first, then the
    /// catalog row's development plaintext as a fallback.
    async fn resolve_password(&self, job: &BackupJob) -> Result<String, BackupError> {
        if let Some(secret_name) = &job.password_secret_name {
            if let Some(password) = self.secrets.get_secret(secret_name).await? {
                return Ok(password);
            }
        }

        if let Some(db) = self.databases.get(&job.database_id).await? {
            if db.use_engine_credentials {
                if let Some(engine_id) = &db.engine_id {
                    if let Some(engine) = self.engine_catalog.get(engine_id).await? {
                        if let Some(password) = engine.password {
                            return Ok(password);
                        }
                    }
                }
            } else if let Some(password) = db.password {
                return Ok(password);
            }
        }

        Err(BackupError::Credential(format!(
            "No password available for database '{}'",
            job.database_name
        )))
    }
}
