//! Registry error taxonomy.

use thiserror::Error;
use verdant_core::ObjectKey;

use crate::admission::AdmissionDenial;

/// Errors surfaced by registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The addressed object does not exist.
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    /// The object already exists; create lost the race.
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    /// The generation precondition failed; the caller must re-read and
    /// retry the whole read-modify-write.
    #[error("conflict on {kind} {key}: object has been modified")]
    Conflict { kind: &'static str, key: ObjectKey },

    /// The admission hook denied the write.
    #[error(transparent)]
    AdmissionDenied(#[from] AdmissionDenial),
}

impl RegistryError {
    /// True for errors the caller may resolve by re-reading and retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
