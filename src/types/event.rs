//! Event log entries: the side channel every component writes to.

use serde::{Deserialize, Serialize};

use super::Severity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    Alert,
    Warning,
    Info,
    Success,
}

impl EventKind {
    /// Event kind that accompanies an anomaly of the given severity.
    pub const fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => EventKind::Alert,
            Severity::Warning => EventKind::Warning,
            Severity::Info => EventKind::Info,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Alert => write!(f, "ALERT"),
            EventKind::Warning => write!(f, "WARNING"),
            EventKind::Info => write!(f, "INFO"),
            EventKind::Success => write!(f, "SUCCESS"),
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub timestamp_ms: i64,
    pub kind: EventKind,
    pub message: String,
}

impl Event {
    pub fn new(kind: EventKind, message: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms,
            kind,
            message: message.into(),
        }
    }
}
