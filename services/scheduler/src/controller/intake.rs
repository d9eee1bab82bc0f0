//! Shoot event intake: maps watch events onto the work queue.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, warn};
use verdant_core::Shoot;
use verdant_registry::{Registry, WatchEvent};

use crate::queue::WorkQueue;

/// Feed shoot events into the queue until shutdown.
pub(super) async fn run_intake(
    registry: Arc<Registry>,
    queue: Arc<WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut events = registry.watch_shoots();

    // Run the current state through the same rules the watch uses, so
    // shoots created before startup are picked up.
    for shoot in registry.list_shoots() {
        enqueue(&queue, &shoot);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(WatchEvent::Added(shoot)) | Ok(WatchEvent::Modified(shoot)) => {
                    enqueue(&queue, &shoot);
                }
                Ok(WatchEvent::Deleted(shoot)) => queue.forget(&shoot.key()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Shoot intake lagged behind watch, relisting");
                    for shoot in registry.list_shoots() {
                        enqueue(&queue, &shoot);
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Shoot intake stopped");
}

fn enqueue(queue: &WorkQueue, shoot: &Shoot) {
    // A shoot that already names a seed is not scheduler work.
    if shoot.spec.seed_name.is_some() {
        return;
    }
    if shoot.metadata.is_terminating() {
        debug!(shoot = %shoot.key(), "Ignoring shoot marked for deletion");
        queue.forget(&shoot.key());
        return;
    }
    queue.add(shoot.key());
}
