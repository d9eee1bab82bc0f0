//! # verdant-core
//!
//! The object model for the verdant landscape: shoots (tenant clusters),
//! seeds (hosting clusters), cloud profiles (provider catalogs), and
//! projects. These types are what the registry stores, the admission
//! validator gates, and the scheduler reads.
//!
//! ## Design Principles
//!
//! - Objects are declarative: spec is user intent, status is observed state
//! - Identity is `(namespace, name)`; cluster-scoped kinds have no namespace
//! - `metadata.generation` increases on every committed spec change and is
//!   the precondition for optimistic updates
//! - A set `deletion_timestamp` means "in teardown"; the core only ever
//!   skips such objects, it never deletes

mod meta;
mod types;
mod version;

pub use meta::{ObjectKey, ObjectMeta};
pub use types::*;
pub use version::{highest_patch_version, ExpirableVersion, Version, VersionError};
