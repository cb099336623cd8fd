//! AI-Assisted Anomaly Detector
//!
//! Sends a window of recent readings to the inference backend and turns the
//! reply into anomalies. Detection is fail-soft: transport errors, bad
//! status codes and unparseable replies all end as an empty AI anomaly set
//! plus a Warning event. Nothing from here propagates into ingestion.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::{InferenceBackend, InferenceError};
use super::cooldown::{Blocked, CooldownGate, DetectorState};
use super::parsing::{normalize_anomalies, parse_model_output, ParseError};
use super::prompt::build_detection_prompt;
use crate::acquisition::TimestampResolver;
use crate::escalation::EscalationDispatcher;
use crate::pipeline::PipelineState;
use crate::types::{Anomaly, EventKind, Reading};

#[derive(Debug, thiserror::Error)]
enum DetectError {
    #[error("prompt encoding failed: {0}")]
    Prompt(#[from] serde_json::Error),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Outcome of one invocation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AiRunOutcome {
    Completed { anomalies: usize },
    Failed { reason: String },
    /// Automatic run inside the cooldown window
    Suppressed { remaining_ms: i64 },
    InFlight,
    NoData,
    Disabled,
}

/// Tunables for the detector.
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub reading_window: usize,
    pub system_prompt: String,
}

pub struct AiDetector {
    backend: Option<Arc<dyn InferenceBackend>>,
    gate: CooldownGate,
    state: Arc<PipelineState>,
    resolver: TimestampResolver,
    escalation: Arc<EscalationDispatcher>,
    settings: DetectorSettings,
}

impl AiDetector {
    pub fn new(
        backend: Option<Arc<dyn InferenceBackend>>,
        gate: CooldownGate,
        state: Arc<PipelineState>,
        resolver: TimestampResolver,
        escalation: Arc<EscalationDispatcher>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            backend,
            gate,
            state,
            resolver,
            escalation,
            settings,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn state(&self) -> DetectorState {
        self.gate.state()
    }

    /// Ask the backend about `recent` (newest first). Failures yield an
    /// empty set and a Warning event.
    pub async fn detect(&self, recent: &[Reading]) -> Vec<Anomaly> {
        match self.try_detect(recent).await {
            Ok(anomalies) => anomalies,
            Err(e) => {
                self.record_failure(&e);
                Vec::new()
            }
        }
    }

    async fn try_detect(&self, recent: &[Reading]) -> Result<Vec<Anomaly>, DetectError> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };
        let invocation_ms = self.resolver.now_ms();
        let prompt = build_detection_prompt(recent)?;

        debug!(
            backend = backend.backend_name(),
            readings = recent.len(),
            "[AI] requesting anomaly detection"
        );
        let reply = backend.complete(&self.settings.system_prompt, &prompt).await?;
        let raw = parse_model_output(&reply)?;
        Ok(normalize_anomalies(raw, &self.resolver, invocation_ms))
    }

    fn record_failure(&self, e: &DetectError) {
        warn!(error = %e, "[AI] anomaly detection failed");
        self.state
            .record_event(EventKind::Warning, format!("AI anomaly detection failed: {e}"));
    }

    /// Run one invocation through the cooldown gate. `manual` bypasses the
    /// cooldown window.
    pub async fn run(&self, manual: bool) -> AiRunOutcome {
        if !self.is_enabled() {
            return AiRunOutcome::Disabled;
        }

        let snapshot = self.state.snapshot();
        let recent = snapshot.recent(self.settings.reading_window);
        if recent.is_empty() {
            return AiRunOutcome::NoData;
        }

        let _permit = match self.gate.try_begin(manual) {
            Ok(permit) => permit,
            Err(Blocked::InFlight) => return AiRunOutcome::InFlight,
            Err(Blocked::Cooling { remaining_ms }) => {
                return AiRunOutcome::Suppressed { remaining_ms };
            }
        };

        let result = self.try_detect(recent).await;
        let completed_ms = self.state.now_ms();

        match result {
            Ok(anomalies) => {
                let count = anomalies.len();
                info!(count, manual, "[AI] detection completed");
                for a in &anomalies {
                    self.state
                        .record_event(EventKind::for_severity(a.severity), a.kind.clone());
                }
                self.escalation.spawn_batch(&anomalies);
                self.state.replace_ai_anomalies(anomalies, completed_ms);
                AiRunOutcome::Completed { anomalies: count }
            }
            Err(e) => {
                self.record_failure(&e);
                self.state.replace_ai_anomalies(Vec::new(), completed_ms);
                AiRunOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Spawn an automatic run if the gate is idle.
    pub fn maybe_spawn(self: &Arc<Self>) -> Option<JoinHandle<AiRunOutcome>> {
        if !self.is_enabled() || self.gate.state() != DetectorState::Idle {
            return None;
        }
        let detector = Arc::clone(self);
        Some(tokio::spawn(async move { detector.run(false).await }))
    }
}
