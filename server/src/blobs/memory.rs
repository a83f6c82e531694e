//! In-memory blob store with fault injection, for tests and throwaway runs.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{new_blob_ref, BlobDeletion, BlobStore};
use crate::error::BlobError;

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    fail_deletes: AtomicBool,
    next_get_delay: Mutex<Option<Duration>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, blob_ref: &str) -> bool {
        self.blobs.contains_key(blob_ref)
    }

    /// Drop a blob behind the registry's back.
    pub fn remove_silently(&self, blob_ref: &str) {
        self.blobs.remove(blob_ref);
    }

    /// Overwrite a blob's bytes behind the registry's back.
    pub fn overwrite(&self, blob_ref: &str, data: &[u8]) {
        self.blobs.insert(blob_ref.to_string(), data.to_vec());
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `get` wait `delay` before reading, like a slow backend.
    pub fn delay_next_get(&self, delay: Duration) {
        if let Ok(mut next) = self.next_get_delay.lock() {
            *next = Some(delay);
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: &[u8], hint: &str) -> Result<String, BlobError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("injected put failure".to_string()));
        }
        let blob_ref = new_blob_ref(hint);
        self.blobs.insert(blob_ref.clone(), data.to_vec());
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobError> {
        let delay = self.next_get_delay.lock().ok().and_then(|mut d| d.take());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("injected get failure".to_string()));
        }
        self.blobs
            .get(blob_ref)
            .map(|b| b.value().clone())
            .ok_or_else(|| BlobError::NotFound(blob_ref.to_string()))
    }

    async fn delete(&self, blob_ref: &str) -> Result<BlobDeletion, BlobError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("injected delete failure".to_string()));
        }
        Ok(match self.blobs.remove(blob_ref) {
            Some(_) => BlobDeletion::Deleted,
            None => BlobDeletion::AlreadyDeleted,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
