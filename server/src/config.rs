use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Anything left unset falls through to the TOML file,
/// then the environment, then built-in defaults.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "vanish-server", version, about = "Ephemeral file sharing server")]
pub struct Cli {
    /// Path to TOML config file
    #[arg(long, default_value = "./vanish.toml")]
    #[serde(skip)]
    pub config: String,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Data directory for persistent state (DB, local blobs)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Public base URL used when formatting download links
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,
    /// Base URL for download links; the request Host header is used when unset
    pub public_url: Option<String>,
    /// Blob storage backend (loaded from [storage] section in TOML)
    pub storage: StorageConfig,
    /// Share limits and cleanup timing (loaded from [lifecycle] section in TOML)
    pub lifecycle: LifecycleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            public_url: None,
            storage: StorageConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files under `{data_dir}/blobs`
    #[default]
    Local,
    /// Supabase-compatible object storage over HTTP
    Remote,
    /// Process memory; lost on restart
    Memory,
}

/// Configuration for the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Storage API base, e.g. `https://<project>.supabase.co/storage/v1`
    pub remote_endpoint: Option<String>,
    pub remote_bucket: String,
    pub remote_api_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            remote_endpoint: None,
            remote_bucket: "filebucket".to_string(),
            remote_api_key: None,
        }
    }
}

/// Configuration for share limits and cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Downloads allowed when the uploader does not say (default: 1)
    pub default_access_limit: i64,
    /// Minutes until expiry when the uploader does not say (default: 10)
    pub default_expiry_minutes: i64,
    pub max_access_limit: i64,
    /// Longest allowed expiry (default: 10080 = 7 days)
    pub max_expiry_minutes: i64,
    /// Seconds between the last permitted download and deletion (default: 120)
    pub grace_period_secs: u64,
    /// Seconds between reaper sweeps (default: 60)
    pub reaper_interval_secs: u64,
    /// Largest accepted upload in megabytes (default: 100)
    pub max_upload_size_mb: u64,
    /// Upload rate limit per client IP (default: 30)
    pub uploads_per_minute: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_access_limit: 1,
            default_expiry_minutes: 10,
            max_access_limit: 100,
            max_expiry_minutes: 7 * 24 * 60,
            grace_period_secs: 120,
            reaper_interval_secs: 60,
            max_upload_size_mb: 100,
            uploads_per_minute: 30,
        }
    }
}

impl LifecycleConfig {
    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (VANISH_*) < CLI args
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `VANISH_STORAGE__BACKEND=remote`.
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("VANISH_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        let lc = &self.lifecycle;
        if lc.max_access_limit < 1 || lc.max_expiry_minutes < 1 {
            return Err("lifecycle maxima must be at least 1".to_string());
        }
        if !(1..=lc.max_access_limit).contains(&lc.default_access_limit) {
            return Err(format!(
                "lifecycle.default_access_limit must be between 1 and {}",
                lc.max_access_limit
            ));
        }
        if !(1..=lc.max_expiry_minutes).contains(&lc.default_expiry_minutes) {
            return Err(format!(
                "lifecycle.default_expiry_minutes must be between 1 and {}",
                lc.max_expiry_minutes
            ));
        }
        if lc.uploads_per_minute == 0 {
            return Err("lifecycle.uploads_per_minute must be at least 1".to_string());
        }
        if self.storage.backend == StorageBackend::Remote
            && self
                .storage
                .remote_endpoint
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err("storage.remote_endpoint is required when storage.backend = \"remote\"".to_string());
        }
        Ok(())
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Vanish Server Configuration
# Place this file at ./vanish.toml or specify with --config <path>
# All settings can be overridden via environment variables (VANISH_PORT,
# VANISH_STORAGE__BACKEND, ...) or CLI flags (--port, ...)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite lease registry and local blobs
# data_dir = "./data"

# Base URL used in download links (default: derived from the request Host)
# public_url = "https://share.example.com"

# ---- Blob Storage ----
# [storage]

# "local" (files under data_dir/blobs), "remote" (Supabase-compatible
# object storage), or "memory" (lost on restart)
# backend = "local"

# Remote object storage settings
# remote_endpoint = "https://<project>.supabase.co/storage/v1"
# remote_bucket = "filebucket"
# remote_api_key = ""

# ---- Share Lifecycle ----
# [lifecycle]

# Defaults applied when an upload does not specify them
# default_access_limit = 1
# default_expiry_minutes = 10

# Upper bounds accepted from uploaders
# max_access_limit = 100
# max_expiry_minutes = 10080   # 7 days

# Seconds after the last permitted download before the file is deleted
# grace_period_secs = 120

# Seconds between sweeps for expired or orphaned leases
# reaper_interval_secs = 60

# Largest accepted upload in megabytes
# max_upload_size_mb = 100

# Uploads allowed per client IP per minute
# uploads_per_minute = 30
"#
    .to_string()
}
