//! Shared data structures for the telemetry pipeline
//!
//! - `Reading` / `SensorSample`: canonical output of the normalizer
//! - `Anomaly`: output of the rule-based and AI-assisted detectors
//! - `Event`: bounded audit trail written by every component

mod anomaly;
mod event;
mod reading;

pub use anomaly::*;
pub use event::*;
pub use reading::*;
