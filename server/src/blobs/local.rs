//! Filesystem blob store.
//!
//! Layout: `{data_dir}/blobs/{blob_ref}`. Writes go to a `.partial` sibling
//! first and are renamed into place, so a reader never sees a torn file.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{is_valid_blob_ref, new_blob_ref, BlobDeletion, BlobStore};
use crate::error::BlobError;

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(data_dir: &str) -> Self {
        Self {
            root: Path::new(data_dir).join("blobs"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, blob_ref: &str) -> Result<PathBuf, BlobError> {
        if !is_valid_blob_ref(blob_ref) {
            return Err(BlobError::NotFound(blob_ref.to_string()));
        }
        Ok(self.root.join(blob_ref))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, data: &[u8], hint: &str) -> Result<String, BlobError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BlobError::Unavailable(format!("Failed to create blobs directory: {}", e)))?;

        let blob_ref = new_blob_ref(hint);
        let final_path = self.blob_path(&blob_ref)?;
        let partial_path = self.root.join(format!("{}.partial", blob_ref));

        if let Err(e) = tokio::fs::write(&partial_path, data).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(BlobError::Unavailable(format!("Failed to write blob file: {}", e)));
        }
        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(BlobError::Unavailable(format!("Failed to finalize blob file: {}", e)));
        }

        tracing::debug!("Stored blob {} ({} bytes)", blob_ref, data.len());
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.blob_path(blob_ref)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(blob_ref.to_string())),
            Err(e) => Err(BlobError::Unavailable(format!(
                "Failed to read blob file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn delete(&self, blob_ref: &str) -> Result<BlobDeletion, BlobError> {
        let path = match self.blob_path(blob_ref) {
            Ok(p) => p,
            // A ref we could never have written has nothing on disk
            Err(_) => return Ok(BlobDeletion::AlreadyDeleted),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(BlobDeletion::Deleted),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BlobDeletion::AlreadyDeleted),
            Err(e) => Err(BlobError::Unavailable(format!(
                "Failed to delete blob file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
