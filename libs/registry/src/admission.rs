//! Admission hook invoked by the registry on shoot writes.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use verdant_core::Shoot;

/// The write operation under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Why a write was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    /// Malformed input, unresolvable reference, naming violation. Not
    /// retriable.
    BadRequest,

    /// Policy violation: protection, overlap, unknown or withdrawn
    /// constraint value. Not retriable.
    Forbidden,
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => write!(f, "bad-request"),
            Self::Forbidden => write!(f, "forbidden"),
        }
    }
}

/// A denial returned from the admission hook.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct AdmissionDenial {
    pub kind: DenialKind,
    pub message: String,
}

impl AdmissionDenial {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: DenialKind::BadRequest,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            kind: DenialKind::Forbidden,
            message: message.into(),
        }
    }
}

/// Review outcome: `None` admits the object unchanged, `Some` admits a
/// mutated object which the registry commits in its place.
pub type AdmissionOutcome = Result<Option<Shoot>, AdmissionDenial>;

/// Gate invoked synchronously on every shoot create/update/delete before
/// the write commits.
#[async_trait]
pub trait AdmissionPlugin: Send + Sync {
    async fn review(&self, operation: Operation, new: &Shoot, old: Option<&Shoot>)
        -> AdmissionOutcome;
}
