//! Remote object-storage blob store.
//!
//! Speaks the Supabase Storage REST dialect:
//!
//! - `POST   {endpoint}/object/{bucket}/{key}` upload
//! - `GET    {endpoint}/object/{bucket}/{key}` download (authenticated)
//! - `DELETE {endpoint}/object/{bucket}/{key}` remove
//!
//! The API key is sent both as a bearer token and as `apikey`, which is what
//! the hosted service expects for service-role access.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

use super::{is_valid_blob_ref, new_blob_ref, BlobDeletion, BlobStore};
use crate::error::BlobError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct RemoteBlobStore {
    client: Client,
    endpoint: String,
    bucket: String,
    api_key: Option<String>,
}

impl RemoteBlobStore {
    pub fn new(endpoint: &str, bucket: &str, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn object_url(&self, blob_ref: &str) -> String {
        format!("{}/object/{}/{}", self.endpoint, self.bucket, blob_ref)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key).header("apikey", key),
            None => req,
        }
    }
}

/// The hosted API reports missing objects as 404, or as 400 with a
/// `not_found` error body on some versions.
fn is_missing(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND
        || (status == StatusCode::BAD_REQUEST && body.to_ascii_lowercase().contains("not_found"))
        || (status == StatusCode::BAD_REQUEST && body.contains("\"404\""))
}

fn unavailable(op: &str, e: impl std::fmt::Display) -> BlobError {
    BlobError::Unavailable(format!("Remote {} failed: {}", op, e))
}

#[async_trait]
impl BlobStore for RemoteBlobStore {
    async fn put(&self, data: &[u8], hint: &str) -> Result<String, BlobError> {
        let blob_ref = new_blob_ref(hint);
        let req = self
            .client
            .post(self.object_url(&blob_ref))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("x-upsert", "false")
            .body(data.to_vec());

        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| unavailable("upload", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(unavailable("upload", format!("HTTP {}: {}", status, body)));
        }

        tracing::debug!("Uploaded blob {} to bucket {} ({} bytes)", blob_ref, self.bucket, data.len());
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobError> {
        if !is_valid_blob_ref(blob_ref) {
            return Err(BlobError::NotFound(blob_ref.to_string()));
        }
        let resp = self
            .authorize(self.client.get(self.object_url(blob_ref)))
            .send()
            .await
            .map_err(|e| unavailable("download", e))?;

        let status = resp.status();
        if status.is_success() {
            let bytes = resp.bytes().await.map_err(|e| unavailable("download", e))?;
            return Ok(bytes.to_vec());
        }

        let body = resp.text().await.unwrap_or_default();
        if is_missing(status, &body) {
            Err(BlobError::NotFound(blob_ref.to_string()))
        } else {
            Err(unavailable("download", format!("HTTP {}: {}", status, body)))
        }
    }

    async fn delete(&self, blob_ref: &str) -> Result<BlobDeletion, BlobError> {
        if !is_valid_blob_ref(blob_ref) {
            return Ok(BlobDeletion::AlreadyDeleted);
        }
        let resp = self
            .authorize(self.client.delete(self.object_url(blob_ref)))
            .send()
            .await
            .map_err(|e| unavailable("delete", e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(BlobDeletion::Deleted);
        }

        let body = resp.text().await.unwrap_or_default();
        if is_missing(status, &body) {
            Ok(BlobDeletion::AlreadyDeleted)
        } else {
            Err(unavailable("delete", format!("HTTP {}: {}", status, body)))
        }
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }
}
