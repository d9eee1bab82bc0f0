//! The scheduling loop: selects a seed for any shoot lacking one.
//!
//! - Intake maps shoot watch events onto the work queue
//! - Workers drain the queue and reconcile one key at a time
//! - The reconciler computes a placement and binds it with an optimistic
//!   write; losing the race to another actor is success, not failure

mod candidates;
mod intake;
mod reconciler;
mod worker;

pub use candidates::{determine_best_seed, ScheduleError};
pub use reconciler::ShootReconciler;
pub use worker::ShootScheduler;
