//! Background reconciliation loop.
//!
//! Idles for the configured interval, then drains the pending-reset queue
//! through cascade resets until it is empty. Failures are contained per key.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::HealingCache;

/// Counts from one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Keys taken from the queue.
    pub processed: usize,
    /// Keys rebuilt, including cascaded dependents.
    pub rebuilt: usize,
    /// Keys whose rebuild failed or panicked.
    pub failed: usize,
}

impl fmt::Display for DrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DrainSummary {{ processed: {}, rebuilt: {}, failed: {} }}",
            self.processed, self.rebuilt, self.failed
        )
    }
}

/// Drains the pending-reset queue of one [`HealingCache`].
pub struct Reconciler<V, C> {
    cache: HealingCache<V, C>,
    wait: Duration,
}

impl<V, C> Reconciler<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    pub fn new(cache: HealingCache<V, C>) -> Self {
        let wait = cache.config().background_wait_non_zero();
        Self { cache, wait }
    }

    /// Run one drain pass now.
    pub async fn drain(&self) -> DrainSummary {
        self.drain_pass(None).await
    }

    async fn drain_pass(&self, shutdown: Option<&watch::Receiver<bool>>) -> DrainSummary {
        let started_at = Instant::now();
        // Evict expired entries so auto-reset hooks enqueue their keys.
        self.cache.run_pending_tasks().await;

        let mut summary = DrainSummary::default();
        loop {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                debug!(
                    remaining = self.cache.queue().len(),
                    "Drain interrupted by shutdown"
                );
                break;
            }
            let Some(key) = self.cache.queue().try_dequeue() else {
                break;
            };
            summary.processed += 1;

            let outcome = self.cache.reset(&key, true).await;
            summary.rebuilt += outcome.rebuilt.len();
            summary.failed += outcome.failed.len();
        }

        if summary.processed > 0 {
            info!(
                summary = %summary,
                elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0,
                "Reconciliation pass complete"
            );
        }
        summary
    }

    /// Alternate between idling and draining until `shutdown` turns `true` or
    /// its sender is dropped. A pass in progress stops between keys.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(wait_ms = self.wait.as_millis() as u64, "Reconciliation loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            self.drain_pass(Some(&shutdown)).await;
        }

        info!("Reconciliation loop stopped");
    }

    /// Run the loop on the tokio runtime.
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        ReconcilerHandle { shutdown, task }
    }
}

impl<V, C> HealingCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    /// Start the background loop if the configuration enables it.
    pub fn spawn_reconciler(&self) -> Option<ReconcilerHandle> {
        if !self.config().use_background_loop {
            debug!("Reconciliation loop disabled by configuration");
            return None;
        }
        Some(Reconciler::new(self.clone()).spawn())
    }
}

/// Owner of a spawned reconciliation loop.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        // The loop may already have exited and dropped its receiver.
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "Reconciliation task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
