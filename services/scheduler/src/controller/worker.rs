//! Scheduler controller: event intake plus N reconcile workers.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use verdant_core::ObjectKey;
use verdant_registry::Registry;

use crate::config::Config;
use crate::indexers::Indexers;
use crate::queue::WorkQueue;

use super::intake::run_intake;
use super::reconciler::ShootReconciler;

/// Long-running controller that drains the shoot queue and assigns seeds.
///
/// Safe at any worker count: two workers racing on the same shoot both
/// compute a candidate, but only one update commits; the loser re-reads,
/// sees the assignment, and exits via the already-scheduled path.
pub struct ShootScheduler {
    registry: Arc<Registry>,
    reconciler: Arc<ShootReconciler>,
    queue: Arc<WorkQueue>,
    concurrent_syncs: usize,
}

impl ShootScheduler {
    pub fn new(registry: Arc<Registry>, indexers: Indexers, config: &Config) -> Self {
        let queue = Arc::new(WorkQueue::new(
            config.retry_sync_period,
            config.max_retry_period,
        ));
        let reconciler = Arc::new(ShootReconciler::new(
            registry.clone(),
            indexers,
            config.strategy,
        ));

        Self {
            registry,
            reconciler,
            queue,
            concurrent_syncs: config.concurrent_syncs,
        }
    }

    /// Run intake and workers until shutdown is signaled, then drain.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(workers = self.concurrent_syncs, "Starting shoot scheduler");

        let intake = tokio::spawn(run_intake(
            self.registry.clone(),
            self.queue.clone(),
            shutdown.clone(),
        ));

        let mut workers = Vec::with_capacity(self.concurrent_syncs);
        for worker_id in 0..self.concurrent_syncs {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                self.reconciler.clone(),
                self.queue.clone(),
                shutdown.clone(),
            )));
        }

        let mut shutdown = shutdown;
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        self.queue.shut_down();
        for worker in workers {
            let _ = worker.await;
        }
        let _ = intake.await;

        info!("Shoot scheduler stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    reconciler: Arc<ShootReconciler>,
    queue: Arc<WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(key) = queue.next().await {
        tokio::select! {
            result = reconciler.reconcile(&key) => {
                finish(&queue, key, result.err().map(|err| err.to_string()), worker_id);
            }
            _ = shutdown.changed() => {
                // Cancelled mid-reconcile: the in-flight call is dropped
                // and the key goes back with backoff.
                queue.retry(key.clone());
                queue.done(&key);
                break;
            }
        }
    }

    debug!(worker_id, "Scheduler worker stopped");
}

fn finish(queue: &WorkQueue, key: ObjectKey, error: Option<String>, worker_id: usize) {
    match error {
        None => queue.forget(&key),
        Some(error) => {
            warn!(worker_id, shoot = %key, error = %error, "Reconcile failed, backing off");
            queue.retry(key.clone());
        }
    }
    queue.done(&key);
}
