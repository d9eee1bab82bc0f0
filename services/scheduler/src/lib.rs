//! verdant scheduler library.
//!
//! This crate primarily ships the `verdant-scheduler` binary, but we expose
//! the module surface to enable integration testing and reuse.

pub mod admission;
pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod indexers;
pub mod queue;
