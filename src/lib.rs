//! Shakti Grid: dual power-meter telemetry pipeline
//!
//! Polls a remote key-value store for readings from two PZEM meters,
//! normalizes them into a canonical history, derives energy figures and
//! detects anomalies with fixed rules and a hosted language model. Critical
//! anomalies are escalated by an automated voice call.
//!
//! ## Architecture
//!
//! - **Acquisition**: store client, timestamp resolver, reading normalizer
//! - **Pipeline**: poller, coordinator, shared snapshot, derived metrics
//! - **Detection**: threshold rules on the latest reading
//! - **LLM**: prompt building, inference client, output parsing, cooldown
//! - **Escalation**: voice-call client and dispatcher
//! - **API**: read-only HTTP views plus manual actions

pub mod acquisition;
pub mod api;
pub mod clock;
pub mod config;
pub mod detection;
pub mod escalation;
pub mod llm;
pub mod pipeline;
pub mod types;

pub use config::AppConfig;
pub use pipeline::{Pipeline, PipelineParts, PipelineSnapshot};
pub use types::{Anomaly, AnomalySource, Event, EventKind, Reading, SensorSample, Severity};
