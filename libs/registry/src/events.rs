//! Per-object audit events.

use chrono::{DateTime, Utc};
use verdant_core::ObjectKey;

/// Event severity, mirrored into the log level when recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// A recorded event attached to an object.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub kind: &'static str,
    pub object: ObjectKey,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
