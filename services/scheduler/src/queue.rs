//! Keyed work queue with deduplication and per-key exponential backoff.
//!
//! Semantics:
//! - A key is held by at most one worker at a time; adds arriving while the
//!   key is being processed coalesce into a single re-queue on `done`.
//! - `retry` re-enqueues after `base * 2^(failures - 1)`, capped.
//! - `forget` resets a key's failure history so its next backoff starts
//!   over at the base delay.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use verdant_core::ObjectKey;

/// Cap on the backoff exponent so the shift cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ObjectKey>,
    /// Keys currently in `ready` or `delayed`.
    queued: HashSet<ObjectKey>,
    /// Keys handed to a worker and not yet `done`.
    processing: HashSet<ObjectKey>,
    /// Keys that were re-added while being processed.
    dirty: HashSet<ObjectKey>,
    /// Keys waiting out a backoff, with their deadline.
    delayed: Vec<(Instant, ObjectKey)>,
    failures: HashMap<ObjectKey, u32>,
    shut_down: bool,
}

/// Deduplicating, rate-limited queue of object keys.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl WorkQueue {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Enqueue a key, unless it is already pending.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.ready.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Re-enqueue a failed key after its backoff delay.
    pub fn retry(&self, key: ObjectKey) {
        let delay = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }

            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            let shift = (*failures - 1).min(MAX_BACKOFF_SHIFT);
            let delay = self
                .base_delay
                .saturating_mul(1u32 << shift)
                .min(self.max_delay);

            if state.queued.insert(key.clone()) {
                state.delayed.push((Instant::now() + delay, key));
            }
            delay
        };

        tracing::debug!(delay_ms = delay.as_millis() as u64, "Key re-enqueued with backoff");
        self.notify.notify_one();
    }

    /// Mark a key as finished; re-queue it if events arrived meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.shut_down && state.queued.insert(key.clone()) {
            state.ready.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Drop the failure history for a key, resetting its backoff. Entries
    /// already pending stay queued; reconciling them again is harmless.
    pub fn forget(&self, key: &ObjectKey) {
        self.lock().failures.remove(key);
    }

    /// Number of pending keys (ready plus delayed).
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.ready.len() + state.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the queue; every waiting `next` call returns `None`.
    pub fn shut_down(&self) {
        self.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    /// Wait for the next key. Returns `None` once the queue shuts down.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let deadline = {
                let mut state = self.lock();

                // Promote delayed keys whose deadline has passed.
                let now = Instant::now();
                let mut index = 0;
                while index < state.delayed.len() {
                    if state.delayed[index].0 <= now {
                        let (_, key) = state.delayed.swap_remove(index);
                        if state.processing.contains(&key) {
                            state.queued.remove(&key);
                            state.dirty.insert(key);
                        } else {
                            state.ready.push_back(key);
                        }
                    } else {
                        index += 1;
                    }
                }

                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }

                if state.shut_down {
                    return None;
                }

                state.delayed.iter().map(|(at, _)| *at).min()
            };

            let notified = self.notify.notified();
            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue lock poisoned")
    }
}
