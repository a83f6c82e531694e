//! The share lifecycle state machine.
//!
//! ```text
//! create ──► ACTIVE ──(last download admitted)──► CONSUMED ──(grace period)──► DELETED
//!              │                                                                 ▲
//!              └──────(expires_at passes, checked on access or by the reaper)────┘
//! ```
//!
//! Eligibility is `now <= expires_at && remaining_downloads > 0`. The registry's
//! `decrement_and_get` is the only arbiter of who gets a download slot; the
//! engine's own pre-check only exists to clean up dead leases early.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::blobs::{BlobDeletion, BlobStore};
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::db::models::{Lease, LeaseState};
use crate::error::{BlobError, RegistryError, ShareError};
use crate::leases::{Decrement, LeaseRegistry};
use crate::lifecycle::scheduler::{DeletionScheduler, DeletionTarget};
use crate::token;

/// Fresh tokens tried before giving up on a create.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Wait before retrying a scheduled deletion that found a download in flight.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Tunables for the engine, usually taken from `[lifecycle]` config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Delay between the last permitted download and deletion.
    pub grace_period: Duration,
    pub max_access_limit: i64,
    pub max_expiry_minutes: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(120),
            max_access_limit: 100,
            max_expiry_minutes: 7 * 24 * 60,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            grace_period: Duration::from_secs(config.grace_period_secs),
            max_access_limit: config.max_access_limit,
            max_expiry_minutes: config.max_expiry_minutes,
        }
    }
}

/// Bytes handed out by a successful retrieve.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub original_name: String,
    /// Downloads left after this one
    pub remaining_downloads: i64,
}

/// Result of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub consumed: usize,
    /// Leases that are mid-download and were left for the next pass
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.consumed
    }
}

pub struct LifecycleEngine {
    registry: LeaseRegistry,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    scheduler: DeletionScheduler,
    settings: EngineSettings,
    /// Admitted downloads still reading their blob, per token
    in_flight: DashMap<String, usize>,
}

/// Marks a token as being served until dropped.
struct ServeGuard<'a> {
    in_flight: &'a DashMap<String, usize>,
    token: String,
}

impl Drop for ServeGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove_if_mut(&self.token, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }
}

impl LifecycleEngine {
    /// Build the engine and start its deletion scheduler on the current runtime.
    pub fn start(
        registry: LeaseRegistry,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let (scheduler, worker) = DeletionScheduler::new();
        let engine = Arc::new(Self {
            registry,
            blobs,
            clock,
            scheduler,
            settings,
            in_flight: DashMap::new(),
        });
        let target: Weak<dyn DeletionTarget> = Arc::downgrade(&engine) as Weak<dyn DeletionTarget>;
        worker.spawn(target);

        tracing::info!(
            "Lifecycle engine started ({} blob storage, {}s grace period)",
            engine.blobs.backend_name(),
            engine.settings.grace_period.as_secs()
        );
        engine
    }

    pub fn registry(&self) -> &LeaseRegistry {
        &self.registry
    }

    /// Store `bytes` and open a lease on them.
    ///
    /// The blob is written first; if the registry insert then fails, the blob
    /// is removed again before the error is returned. A token collision is
    /// retried with a fresh token and never surfaces.
    pub async fn create(
        &self,
        bytes: &[u8],
        original_name: &str,
        access_limit: i64,
        expiry_minutes: i64,
    ) -> Result<Lease, ShareError> {
        self.validate_create(access_limit, expiry_minutes)?;

        let content_sha256 = hex::encode(Sha256::digest(bytes));

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let token = token::generate_token();
            let blob_ref = self.blobs.put(bytes, &token).await?;

            let now = self.clock.now();
            let lease = Lease {
                token: token.clone(),
                original_name: original_name.to_string(),
                blob_ref: blob_ref.clone(),
                content_sha256: content_sha256.clone(),
                size_bytes: bytes.len() as i64,
                access_limit,
                remaining_downloads: access_limit,
                expires_at: now + chrono::Duration::minutes(expiry_minutes),
                created_at: now,
                consumed_at: None,
            };

            match self.registry.create(lease).await {
                Ok(lease) => {
                    tracing::info!(
                        "Lease {} created: {} bytes, {} downloads, expires {}",
                        lease.token,
                        lease.size_bytes,
                        lease.access_limit,
                        lease.expires_at.to_rfc3339()
                    );
                    return Ok(lease);
                }
                Err(RegistryError::Conflict(_)) => {
                    tracing::warn!(
                        "Token collision on create (attempt {}/{}), retrying",
                        attempt,
                        MAX_CREATE_ATTEMPTS
                    );
                    self.discard_orphan(&blob_ref).await;
                }
                Err(e) => {
                    self.discard_orphan(&blob_ref).await;
                    return Err(e.into());
                }
            }
        }

        Err(ShareError::StorageUnavailable(
            "could not allocate a unique share token".to_string(),
        ))
    }

    fn validate_create(&self, access_limit: i64, expiry_minutes: i64) -> Result<(), ShareError> {
        if access_limit < 1 {
            return Err(ShareError::InvalidRequest(
                "access_limit must be at least 1".to_string(),
            ));
        }
        if access_limit > self.settings.max_access_limit {
            return Err(ShareError::InvalidRequest(format!(
                "access_limit must be at most {}",
                self.settings.max_access_limit
            )));
        }
        if expiry_minutes < 1 {
            return Err(ShareError::InvalidRequest(
                "expiry_minutes must be at least 1".to_string(),
            ));
        }
        if expiry_minutes > self.settings.max_expiry_minutes {
            return Err(ShareError::InvalidRequest(format!(
                "expiry_minutes must be at most {}",
                self.settings.max_expiry_minutes
            )));
        }
        Ok(())
    }

    /// Compensating delete for a blob whose lease never made it into the registry.
    async fn discard_orphan(&self, blob_ref: &str) {
        if let Err(e) = self.blobs.delete(blob_ref).await {
            tracing::error!(
                "Orphaned blob {} left in {} storage after failed create: {}",
                blob_ref,
                self.blobs.backend_name(),
                e
            );
        }
    }

    /// Serve one download of `token`, if it is still eligible.
    pub async fn retrieve(&self, token: &str) -> Result<Download, ShareError> {
        if !token::is_well_formed(token) {
            return Err(ShareError::NotFound);
        }

        let lease = self.registry.get(token).await?;
        let now = self.clock.now();

        if !lease.is_eligible(now) {
            let state = lease.state(now);
            tracing::warn!("Lease {} requested while {:?}, deleting", token, state);
            self.expunge_if_idle(&lease).await;
            return Err(denial(state));
        }

        let guard = self.begin_serve(token);
        let lease = match self.registry.decrement_and_get(token, now).await? {
            Decrement::Admitted(lease) => lease,
            Decrement::Ineligible(lease) => {
                drop(guard);
                tracing::debug!("Lease {} lost the race for its last download", token);
                self.expunge_if_idle(&lease).await;
                return Err(denial(lease.state(now)));
            }
        };

        let bytes = match self.blobs.get(&lease.blob_ref).await {
            Ok(bytes) => bytes,
            Err(BlobError::NotFound(_)) => {
                drop(guard);
                return Err(self.purge_corrupt(&lease, "blob is missing").await);
            }
            Err(BlobError::Unavailable(msg)) => {
                // Nothing was served, so give the slot back
                if let Err(e) = self.registry.restore_slot(token).await {
                    tracing::error!("Failed to restore download slot for lease {}: {}", token, e);
                }
                drop(guard);
                return Err(ShareError::StorageUnavailable(msg));
            }
        };

        if hex::encode(Sha256::digest(&bytes)) != lease.content_sha256 {
            drop(guard);
            return Err(self.purge_corrupt(&lease, "blob content does not match its digest").await);
        }
        drop(guard);

        if lease.remaining_downloads == 0 {
            tracing::info!(
                "Lease {} consumed, deleting in {}s",
                token,
                self.settings.grace_period.as_secs()
            );
            self.scheduler.schedule(token, self.settings.grace_period);
        } else {
            tracing::debug!(
                "Served lease {} ({} downloads left)",
                token,
                lease.remaining_downloads
            );
        }

        Ok(Download {
            bytes,
            original_name: lease.original_name,
            remaining_downloads: lease.remaining_downloads,
        })
    }

    /// Remove a lease and its blob. Idempotent.
    ///
    /// Returns whether this call removed the registry row. A blob delete that
    /// fails keeps the row so a later pass can retry.
    pub async fn delete(&self, token: &str) -> Result<bool, ShareError> {
        let lease = match self.registry.get(token).await {
            Ok(lease) => lease,
            Err(RegistryError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        self.remove_lease(&lease).await
    }

    async fn remove_lease(&self, lease: &Lease) -> Result<bool, ShareError> {
        if self.blobs.delete(&lease.blob_ref).await? == BlobDeletion::AlreadyDeleted {
            tracing::warn!(
                "Blob {} for lease {} was already deleted",
                lease.blob_ref,
                lease.token
            );
        }
        let removed = self.registry.delete(&lease.token).await?;
        if removed {
            tracing::info!("Lease {} deleted", lease.token);
        }
        Ok(removed)
    }

    /// Leases whose expiry has passed, for external reapers.
    pub async fn expired_leases(&self) -> Result<Vec<Lease>, ShareError> {
        Ok(self.registry.list_expired(self.clock.now()).await?)
    }

    /// Delete every expired lease, plus consumed leases whose grace period is
    /// over (their scheduled deletion was lost).
    pub async fn sweep(&self) -> Result<SweepReport, ShareError> {
        let now = self.clock.now();
        let grace = chrono::Duration::from_std(self.settings.grace_period)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let expired = self.registry.list_expired(now).await?;
        let consumed = self.registry.list_consumed_before(now - grace).await?;

        let mut report = SweepReport::default();
        let mut seen = HashSet::new();

        for (lease, is_expired) in expired
            .iter()
            .map(|l| (l, true))
            .chain(consumed.iter().map(|l| (l, false)))
        {
            if !seen.insert(lease.token.as_str()) {
                continue;
            }
            if self.is_serving(&lease.token) {
                report.skipped += 1;
                continue;
            }
            match self.remove_lease(lease).await {
                Ok(true) if is_expired => report.expired += 1,
                Ok(true) => report.consumed += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Reaper failed to delete lease {}: {}", lease.token, e);
                }
            }
        }

        Ok(report)
    }

    fn begin_serve(&self, token: &str) -> ServeGuard<'_> {
        *self.in_flight.entry(token.to_string()).or_insert(0) += 1;
        ServeGuard {
            in_flight: &self.in_flight,
            token: token.to_string(),
        }
    }

    fn is_serving(&self, token: &str) -> bool {
        self.in_flight.get(token).map(|n| *n > 0).unwrap_or(false)
    }

    /// Denial-path deletion. Skipped while an admitted download of the same
    /// token is still reading; that download arms the scheduled deletion.
    async fn expunge_if_idle(&self, lease: &Lease) {
        if self.is_serving(&lease.token) {
            tracing::debug!(
                "Lease {} still being served, leaving deletion to the scheduler",
                lease.token
            );
            return;
        }
        if let Err(e) = self.remove_lease(lease).await {
            tracing::error!("Failed to delete dead lease {}: {}", lease.token, e);
        }
    }

    /// Registry says the lease is live but its bytes are gone or wrong.
    async fn purge_corrupt(&self, lease: &Lease, what: &str) -> ShareError {
        tracing::error!(
            "Corrupt lease {}: {} (blob_ref={}, backend={}); purging",
            lease.token,
            what,
            lease.blob_ref,
            self.blobs.backend_name()
        );
        if let Err(e) = self.remove_lease(lease).await {
            tracing::error!("Failed to purge corrupt lease {}: {}", lease.token, e);
        }
        ShareError::CorruptState(format!("lease {}: {}", lease.token, what))
    }
}

/// Error for a lease that is no longer eligible.
fn denial(state: LeaseState) -> ShareError {
    match state {
        LeaseState::Expired => ShareError::Expired,
        LeaseState::Consumed | LeaseState::Active => ShareError::LimitReached,
    }
}

#[async_trait]
impl DeletionTarget for LifecycleEngine {
    async fn expunge_scheduled(&self, token: &str) {
        if self.is_serving(token) {
            tracing::debug!("Lease {} still being served, retrying deletion shortly", token);
            self.scheduler.schedule(token, BUSY_RETRY_DELAY);
            return;
        }
        match self.delete(token).await {
            Ok(true) => tracing::debug!("Scheduled deletion of lease {} completed", token),
            Ok(false) => tracing::debug!("Scheduled deletion of lease {}: already gone", token),
            Err(e) => tracing::error!("Scheduled deletion of lease {} failed: {}", token, e),
        }
    }
}
