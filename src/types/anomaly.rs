//! Anomaly records produced by the rule-based and AI-assisted detectors.

use serde::{Deserialize, Serialize};

/// Severity level for anomalies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    #[default]
    Info = 1,
    Warning = 2,
    Critical = 3,
}

impl Severity {
    /// Lenient parse used for model output: anything unrecognised is `Info`.
    pub fn from_loose(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "warning" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which detector produced an anomaly
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnomalySource {
    Rule,
    Ai,
}

impl std::fmt::Display for AnomalySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySource::Rule => write!(f, "RULE"),
            AnomalySource::Ai => write!(f, "AI"),
        }
    }
}

/// A detected anomaly. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub id: String,
    pub kind: String,
    pub severity: Severity,
    pub explanation: String,
    pub timestamp_ms: i64,
    pub source: AnomalySource,
}

impl Anomaly {
    /// Build an anomaly with a freshly generated id.
    pub fn new(
        kind: impl Into<String>,
        severity: Severity,
        explanation: impl Into<String>,
        timestamp_ms: i64,
        source: AnomalySource,
    ) -> Self {
        let prefix = match source {
            AnomalySource::Rule => "rule",
            AnomalySource::Ai => "ai",
        };
        Self {
            id: format!("{prefix}-{}", uuid::Uuid::new_v4()),
            kind: kind.into(),
            severity,
            explanation: explanation.into(),
            timestamp_ms,
            source,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}
