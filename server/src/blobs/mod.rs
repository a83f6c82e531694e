//! Raw byte storage for shared files.
//!
//! The lifecycle engine only sees the [`BlobStore`] trait. Which backend sits
//! behind it (local disk, a remote object store, or memory) is decided once at
//! startup from `[storage]` config.
//!
//! Blob refs are `{hint}-{uuid}`: the hint is the share token, the uuid makes
//! every `put` land on a fresh key even if a token is ever retried.

pub mod local;
pub mod memory;
pub mod remote;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::BlobError;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use remote::RemoteBlobStore;

/// What a delete actually did. Deleting a missing blob is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobDeletion {
    Deleted,
    AlreadyDeleted,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under a fresh ref derived from `hint`.
    async fn put(&self, data: &[u8], hint: &str) -> Result<String, BlobError>;

    /// Full contents, or `BlobError::NotFound`.
    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobError>;

    /// Idempotent removal.
    async fn delete(&self, blob_ref: &str) -> Result<BlobDeletion, BlobError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Build a fresh blob ref for `hint`.
///
/// Only ASCII alphanumerics from the hint survive, so refs are always safe as
/// file names and object keys.
pub fn new_blob_ref(hint: &str) -> String {
    let prefix: String = hint
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(32)
        .collect();
    let id = uuid::Uuid::new_v4().simple().to_string();
    if prefix.is_empty() {
        id
    } else {
        format!("{}-{}", prefix, id)
    }
}

/// Whether `blob_ref` has the shape produced by [`new_blob_ref`].
pub fn is_valid_blob_ref(blob_ref: &str) -> bool {
    !blob_ref.is_empty()
        && blob_ref.len() <= 80
        && blob_ref
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Construct the configured backend.
pub fn build_blob_store(
    config: &StorageConfig,
    data_dir: &str,
) -> Result<Arc<dyn BlobStore>, String> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalBlobStore::new(data_dir))),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory blob storage; uploads will not survive a restart");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        StorageBackend::Remote => {
            let endpoint = config
                .remote_endpoint
                .as_deref()
                .filter(|e| !e.is_empty())
                .ok_or("storage.remote_endpoint is required for the remote backend")?;
            let store = RemoteBlobStore::new(
                endpoint,
                &config.remote_bucket,
                config.remote_api_key.clone(),
            )
            .map_err(|e| format!("Failed to build remote blob store: {}", e))?;
            Ok(Arc::new(store))
        }
    }
}
