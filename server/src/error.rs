//! Error taxonomy for the share lifecycle.
//!
//! Each storage layer has its own error type; the lifecycle engine folds them
//! into [`ShareError`], which is what HTTP handlers see.

use axum::http::StatusCode;
use thiserror::Error;

/// Blob store failures.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob {0} not found")]
    NotFound(String),
    #[error("blob storage unavailable: {0}")]
    Unavailable(String),
}

/// Lease registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("lease {0} not found")]
    NotFound(String),
    #[error("lease token {0} already exists")]
    Conflict(String),
    #[error("lease registry unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        RegistryError::Unavailable(e.to_string())
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(e: tokio::task::JoinError) -> Self {
        RegistryError::Unavailable(format!("task join error: {}", e))
    }
}

/// Errors surfaced by the lifecycle engine.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no share exists for this token")]
    NotFound,
    #[error("share has expired")]
    Expired,
    #[error("download limit reached")]
    LimitReached,
    #[error("token collision")]
    Conflict,
    /// Registry and blob store disagree. Logged loudly; callers only see 404.
    #[error("share state is inconsistent: {0}")]
    CorruptState(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ShareError {
    /// HTTP status the surrounding layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ShareError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ShareError::NotFound | ShareError::CorruptState(_) => StatusCode::NOT_FOUND,
            ShareError::Expired | ShareError::LimitReached => StatusCode::FORBIDDEN,
            ShareError::Conflict => StatusCode::CONFLICT,
            ShareError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message safe to show to an HTTP client.
    pub fn public_message(&self) -> String {
        match self {
            ShareError::InvalidRequest(msg) => msg.clone(),
            ShareError::NotFound | ShareError::CorruptState(_) => {
                "Invalid or expired link".to_string()
            }
            ShareError::Expired => "File expired".to_string(),
            ShareError::LimitReached => "Download limit reached".to_string(),
            ShareError::Conflict => "Token collision, please retry".to_string(),
            ShareError::StorageUnavailable(_) => "Storage temporarily unavailable".to_string(),
        }
    }
}

impl From<BlobError> for ShareError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(r) => ShareError::CorruptState(format!("blob {} missing", r)),
            BlobError::Unavailable(msg) => ShareError::StorageUnavailable(msg),
        }
    }
}

impl From<RegistryError> for ShareError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ShareError::NotFound,
            RegistryError::Conflict(_) => ShareError::Conflict,
            RegistryError::Unavailable(msg) => ShareError::StorageUnavailable(msg),
        }
    }
}

impl From<ShareError> for (StatusCode, String) {
    fn from(e: ShareError) -> Self {
        (e.status_code(), e.public_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility_failures_map_to_forbidden() {
        assert_eq!(ShareError::Expired.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ShareError::LimitReached.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ShareError::NotFound.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_corrupt_state_hidden_as_not_found() {
        let err = ShareError::CorruptState("blob abc missing".to_string());
        let (status, msg): (StatusCode, String) = err.into();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!msg.contains("abc"));
    }

    #[test]
    fn test_missing_blob_becomes_corrupt_state() {
        let err: ShareError = BlobError::NotFound("x".to_string()).into();
        assert!(matches!(err, ShareError::CorruptState(_)));
    }
}
