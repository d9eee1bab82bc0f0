//! Per-key reconcile: compute a placement and bind it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};
use verdant_core::{ObjectKey, Seed, Shoot};
use verdant_registry::{EventType, Registry};

use crate::config::Strategy;
use crate::indexers::Indexers;

use super::candidates::{determine_best_seed, ScheduleError};

const EVENT_SCHEDULING_SUCCESSFUL: &str = "SchedulingSuccessful";
const EVENT_SCHEDULING_FAILED: &str = "SchedulingFailed";

/// Message prefix for failed-scheduling events.
const MSG_UNSCHEDULABLE: &str = "Failed to schedule shoot";

/// Bounded ladder for retrying a lost optimistic update before giving the
/// key back to the queue.
const BIND_CONFLICT_RETRIES: u32 = 5;
const BIND_RETRY_BASE: Duration = Duration::from_millis(10);

enum BindOutcome {
    /// The seed name was written.
    Bound,
    /// Another actor assigned a seed first; success, no event.
    AlreadyScheduled,
    /// The shoot disappeared while binding.
    Gone,
}

/// Reconciles a single shoot key: no-op when the shoot is gone, terminating,
/// or already placed; otherwise selects a seed and binds it.
pub struct ShootReconciler {
    registry: Arc<Registry>,
    indexers: Indexers,
    strategy: Strategy,
}

impl ShootReconciler {
    pub fn new(registry: Arc<Registry>, indexers: Indexers, strategy: Strategy) -> Self {
        Self {
            registry,
            indexers,
            strategy,
        }
    }

    /// Reconcile one key. Errors are reported as `SchedulingFailed` events
    /// before they are returned; the queue retries them with backoff.
    #[instrument(skip(self), fields(shoot = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<(), ScheduleError> {
        // The cache can trail the watch event that enqueued this key, so a
        // miss is confirmed against the store of record before giving up.
        let shoot = match self.indexers.shoots.get(key) {
            Some(shoot) => shoot,
            None => match self.registry.get_shoot(key) {
                Ok(shoot) => Arc::new(shoot),
                Err(err) if err.is_not_found() => {
                    debug!("Shoot is gone, nothing to do");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            },
        };
        if shoot.metadata.is_terminating() {
            debug!("Shoot is marked for deletion, skipping");
            return Ok(());
        }
        if shoot.spec.seed_name.is_some() {
            debug!("Shoot already has a seed assigned");
            return Ok(());
        }

        debug!(strategy = %self.strategy, "Determining seed for shoot");

        let seed = match self.determine(&shoot) {
            Ok(seed) => seed,
            Err(err) => {
                self.report_failure(&shoot, &err);
                return Err(err);
            }
        };

        match self.bind(key, &seed.metadata.name).await {
            Ok(BindOutcome::Bound) => {
                info!(
                    seed = %seed.metadata.name,
                    cloud_profile = %shoot.spec.cloud_profile_name,
                    region = %shoot.spec.region,
                    strategy = %self.strategy,
                    "Shoot successfully scheduled"
                );
                self.registry.record_event(
                    shoot.as_ref(),
                    EventType::Normal,
                    EVENT_SCHEDULING_SUCCESSFUL,
                    format!("Scheduled to seed '{}'", seed.metadata.name),
                );
                Ok(())
            }
            Ok(BindOutcome::AlreadyScheduled) => {
                debug!("Shoot was scheduled by another actor meanwhile");
                Ok(())
            }
            Ok(BindOutcome::Gone) => Ok(()),
            Err(err) => {
                self.report_failure(&shoot, &err);
                Err(err)
            }
        }
    }

    fn determine(&self, shoot: &Shoot) -> Result<Arc<Seed>, ScheduleError> {
        let profile = self
            .indexers
            .cloud_profiles
            .get(&ObjectKey::cluster(&shoot.spec.cloud_profile_name))
            .ok_or_else(|| {
                ScheduleError::CloudProfileNotFound(shoot.spec.cloud_profile_name.clone())
            })?;

        let seeds = self.indexers.seeds.list();
        let shoots = self.indexers.shoots.list();
        determine_best_seed(shoot, &profile, &shoots, &seeds, self.strategy)
    }

    /// Read-modify-write loop against the registry. Another mutator may be
    /// acting on the shoot concurrently, so the precondition is re-checked
    /// from the latest object on every attempt.
    async fn bind(&self, key: &ObjectKey, seed_name: &str) -> Result<BindOutcome, ScheduleError> {
        let mut attempt: u32 = 0;
        loop {
            let mut latest = match self.registry.get_shoot(key) {
                Ok(shoot) => shoot,
                Err(err) if err.is_not_found() => return Ok(BindOutcome::Gone),
                Err(err) => return Err(err.into()),
            };

            if latest.spec.seed_name.is_some() {
                return Ok(BindOutcome::AlreadyScheduled);
            }

            latest.spec.seed_name = Some(seed_name.to_string());
            match self.registry.update_shoot(latest).await {
                Ok(_) => return Ok(BindOutcome::Bound),
                Err(err) if err.is_conflict() && attempt < BIND_CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!(attempt, "Binding update conflicted, retrying");
                    tokio::time::sleep(BIND_RETRY_BASE * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn report_failure(&self, shoot: &Shoot, err: &ScheduleError) {
        self.registry.record_event(
            shoot,
            EventType::Warning,
            EVENT_SCHEDULING_FAILED,
            format!("{MSG_UNSCHEDULABLE} '{}': {err}", shoot.metadata.name),
        );
    }
}
