//! Filesystem-backed object store for backup artifacts.
//!
//! Layout: `{root}/{container}/{database_type}/{database_id}/{timestamp}.{ext}`.
//! Uploads are staged under a temporary name in the final directory and
//! renamed on commit, so a blob either exists with its final bytes or not at
//! all.

use crate::models::errors::BackupError;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, container: &str, blob_name: &str) -> PathBuf {
        self.root.join(container).join(blob_name)
    }

    pub fn url(&self, container: &str, blob_name: &str) -> String {
        format!("file://{}", self.blob_path(container, blob_name).display())
    }

    /// Stage a new upload. The temporary file lives next to the final path so
    /// the commit rename stays on one filesystem.
    pub fn begin_upload(&self, container: &str, blob_name: &str) -> Result<BlobUpload, BackupError> {
        let final_path = self.blob_path(container, blob_name);
        let parent = final_path
            .parent()
            .ok_or_else(|| BackupError::Storage(format!("invalid blob name: {}", blob_name)))?;
        fs::create_dir_all(parent)?;

        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BackupError::Storage(format!("invalid blob name: {}", blob_name)))?;
        let temp_path = parent.join(format!(".{}.upload-{}", file_name, uuid::Uuid::new_v4()));

        Ok(BlobUpload {
            temp_path,
            final_path,
            url: self.url(container, blob_name),
        })
    }

    pub fn exists(&self, container: &str, blob_name: &str) -> bool {
        self.blob_path(container, blob_name).is_file()
    }

    pub fn size(&self, container: &str, blob_name: &str) -> Result<u64, BackupError> {
        Ok(fs::metadata(self.blob_path(container, blob_name))?.len())
    }

    /// Delete a blob. Returns false when it was already gone.
    pub fn delete(&self, container: &str, blob_name: &str) -> Result<bool, BackupError> {
        let path = self.blob_path(container, blob_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob addressed by its stored URL. Used when the owning record
    /// may point at a non-default container.
    pub fn delete_by_url(&self, url: &str) -> Result<bool, BackupError> {
        let path = url
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| BackupError::Storage(format!("unsupported blob url: {}", url)))?;
        if !path.starts_with(&self.root) {
            return Err(BackupError::Storage(format!(
                "blob url outside store root: {}",
                url
            )));
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// A staged upload: write to `temp_path`, then `commit` to publish.
pub struct BlobUpload {
    temp_path: PathBuf,
    final_path: PathBuf,
    url: String,
}

impl BlobUpload {
    pub fn create(&self) -> Result<File, BackupError> {
        Ok(File::create(&self.temp_path)?)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Publish the staged bytes under the final name and return
    /// `(url, size_bytes)`.
    pub fn commit(self) -> Result<(String, u64), BackupError> {
        fs::rename(&self.temp_path, &self.final_path)?;
        let size = fs::metadata(&self.final_path)?.len();
        Ok((self.url, size))
    }

    /// Drop the staged bytes without publishing.
    pub fn abort(self) {
        let _ = fs::remove_file(&self.temp_path);
    }
}
