//! Background sweep for leases whose deletion never happened.
//!
//! Spawns a tokio task that periodically deletes expired leases and consumed
//! leases past their grace period. Scheduled deletions are lost on restart,
//! so one sweep also runs immediately at startup.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::lifecycle::LifecycleEngine;

/// Spawn the reaper. Runs `sweep` now and then every `interval_secs` seconds.
pub fn spawn_reaper(engine: Arc<LifecycleEngine>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            run_once(&engine).await;
        }
    })
}

async fn run_once(engine: &LifecycleEngine) {
    match engine.sweep().await {
        Ok(report) if report.removed() > 0 || report.failed > 0 => {
            tracing::info!(
                "Lease reaper: removed {} expired and {} consumed leases ({} failed, {} in use)",
                report.expired,
                report.consumed,
                report.failed,
                report.skipped
            );
        }
        Ok(_) => {
            tracing::debug!("Lease reaper: nothing to remove");
        }
        Err(e) => {
            tracing::error!("Lease reaper error: {}", e);
        }
    }
}
