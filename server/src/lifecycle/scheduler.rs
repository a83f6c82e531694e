//! Delayed deletion of consumed leases.
//!
//! One worker task owns a min-heap of pending deadlines and sleeps until the
//! earliest one. Callers hold a cheap [`DeletionScheduler`] handle that feeds
//! the worker over a channel; no task is parked per download.
//!
//! Timers are best-effort: a crash loses them, and the reaper picks up
//! whatever they would have deleted.

use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Whatever the scheduler calls when a timer fires.
#[async_trait]
pub trait DeletionTarget: Send + Sync {
    /// Must not fail; errors are the target's to log.
    async fn expunge_scheduled(&self, token: &str);
}

#[derive(Debug)]
struct ScheduledDeletion {
    token: String,
    fire_at: Instant,
}

/// Handle for arming deletion timers.
#[derive(Clone)]
pub struct DeletionScheduler {
    tx: mpsc::UnboundedSender<ScheduledDeletion>,
}

/// Receiving half; turned into a running task with [`SchedulerWorker::spawn`].
pub struct SchedulerWorker {
    rx: mpsc::UnboundedReceiver<ScheduledDeletion>,
}

impl DeletionScheduler {
    pub fn new() -> (Self, SchedulerWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, SchedulerWorker { rx })
    }

    /// Arm a one-shot deletion of `token` after `delay`.
    pub fn schedule(&self, token: &str, delay: Duration) {
        self.schedule_at(token, Instant::now() + delay);
    }

    pub fn schedule_at(&self, token: &str, fire_at: Instant) {
        let entry = ScheduledDeletion {
            token: token.to_string(),
            fire_at,
        };
        if self.tx.send(entry).is_err() {
            tracing::warn!(
                "Deletion scheduler is not running; lease {} left for the reaper",
                token
            );
        }
    }
}

impl SchedulerWorker {
    /// Run the timer loop until every scheduler handle is dropped or the
    /// target goes away.
    pub fn spawn(self, target: Weak<dyn DeletionTarget>) -> JoinHandle<()> {
        tokio::spawn(self.run(target))
    }

    async fn run(mut self, target: Weak<dyn DeletionTarget>) {
        // (deadline, arrival order, token): earliest deadline first, FIFO on ties
        let mut pending: BinaryHeap<Reverse<(Instant, u64, String)>> = BinaryHeap::new();
        let mut arrivals: u64 = 0;

        loop {
            let next_deadline = pending.peek().map(|Reverse((at, _, _))| *at);
            let sleep = tokio::time::sleep_until(
                next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(entry) => {
                        tracing::debug!("Armed deletion timer for lease {}", entry.token);
                        pending.push(Reverse((entry.fire_at, arrivals, entry.token)));
                        arrivals += 1;
                    }
                    None => {
                        if !pending.is_empty() {
                            tracing::info!(
                                "Deletion scheduler shutting down with {} pending timers",
                                pending.len()
                            );
                        }
                        break;
                    }
                },
                _ = sleep, if next_deadline.is_some() => {
                    let now = Instant::now();
                    while let Some(Reverse((at, _, _))) = pending.peek() {
                        if *at > now {
                            break;
                        }
                        let Some(Reverse((_, _, token))) = pending.pop() else {
                            break;
                        };
                        let Some(target) = target.upgrade() else {
                            tracing::debug!("Deletion target dropped, stopping scheduler");
                            return;
                        };
                        // Fired deletions run off the timer loop so a slow
                        // store never delays other deadlines.
                        tokio::spawn(async move {
                            target.expunge_scheduled(&token).await;
                        });
                    }
                }
            }
        }
    }
}
