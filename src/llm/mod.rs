//! AI-assisted anomaly detection
//!
//! ## Architecture
//!
//! - `client`: OpenAI-compatible chat completions behind the
//!   [`InferenceBackend`] seam
//! - `prompt` / `parsing`: request construction and forgiving reply parsing
//! - `cooldown`: `Idle`/`Cooling` gate shared by automatic and manual runs
//! - `detector`: ties the above to pipeline state and escalation

pub mod client;
pub mod cooldown;
pub mod detector;
pub mod parsing;
pub mod prompt;

pub use client::{HttpInferenceClient, InferenceBackend, InferenceError};
pub use cooldown::{CooldownGate, DetectorState};
pub use detector::{AiDetector, AiRunOutcome, DetectorSettings};
