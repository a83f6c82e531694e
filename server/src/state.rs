use std::sync::Arc;

use crate::config::Config;
use crate::lifecycle::LifecycleEngine;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Lease lifecycle engine (owns the registry, blob store and scheduler)
    pub engine: Arc<LifecycleEngine>,
    /// Base URL for download links, if configured
    pub public_url: Option<String>,
    /// Downloads allowed when an upload does not specify a limit
    pub default_access_limit: i64,
    /// Minutes until expiry when an upload does not specify one
    pub default_expiry_minutes: i64,
    /// Largest accepted file in bytes
    pub max_upload_bytes: usize,
    /// Upload rate limit per client IP
    pub uploads_per_minute: u32,
}

impl AppState {
    pub fn new(engine: Arc<LifecycleEngine>, config: &Config) -> Self {
        Self {
            engine,
            public_url: config
                .public_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            default_access_limit: config.lifecycle.default_access_limit,
            default_expiry_minutes: config.lifecycle.default_expiry_minutes,
            max_upload_bytes: config.lifecycle.max_upload_bytes(),
            uploads_per_minute: config.lifecycle.uploads_per_minute,
        }
    }
}
