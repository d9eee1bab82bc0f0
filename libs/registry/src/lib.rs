//! # verdant-registry
//!
//! The registry surface the scheduler and admission validator are written
//! against. In production deployments the store of record is the platform's
//! declarative API server; this crate provides the same semantics in
//! process:
//!
//! - Typed stores addressed by `(namespace, name)` with list/get/watch
//! - Optimistic updates preconditioned on `metadata.generation`
//! - A synchronous admission hook gating every shoot create/update
//! - A per-object event log for human-visible audit
//!
//! # Invariants
//!
//! - Every committed spec change bumps the object's generation by one
//! - Watch events are delivered in commit order per kind
//! - An update whose generation precondition fails never mutates the store

mod admission;
mod error;
mod events;
mod object;
mod registry;
mod store;

pub use admission::{AdmissionDenial, AdmissionOutcome, AdmissionPlugin, DenialKind, Operation};
pub use error::RegistryError;
pub use events::{EventRecord, EventType};
pub use object::StoredObject;
pub use registry::Registry;
pub use store::{Store, WatchEvent};

/// Convenience alias for registry results.
pub type Result<T> = std::result::Result<T, RegistryError>;
