//! Processing Pipeline Module
//!
//! ```text
//! Ingestion Controller (interval poll, per-cycle cancellation)
//!   -> Reading Normalizer (Timestamp Resolver)
//!   -> canonical history (PipelineState, ArcSwap snapshot)
//!   -> { Derived Metrics, Rule Detector, AI Detector }
//!   -> Escalation Dispatcher -> Event Log
//! ```

mod coordinator;
pub mod metrics;
pub mod poller;
mod state;

pub use coordinator::{
    CycleOutcome, PipelineCoordinator, PipelineStats, LIVE_CONNECTION_ESTABLISHED,
    LIVE_CONNECTION_INTERRUPTED, MANUAL_TEST_ANOMALY,
};
pub use poller::{IngestionController, PollerHandle, PollerProbe, PollerState};
pub use state::*;

use std::sync::Arc;

use crate::acquisition::{ReadingNormalizer, TelemetryStore, TimestampResolver};
use crate::clock::SharedClock;
use crate::config::AppConfig;
use crate::detection::RuleEngine;
use crate::escalation::{CallTransport, EscalationDispatcher};
use crate::llm::{AiDetector, CooldownGate, DetectorSettings, InferenceBackend};

/// External collaborators the pipeline is wired to. `None` disables the
/// corresponding component.
pub struct PipelineParts {
    pub store: Arc<dyn TelemetryStore>,
    pub inference: Option<Arc<dyn InferenceBackend>>,
    pub calls: Option<Arc<dyn CallTransport>>,
    pub clock: SharedClock,
}

/// Fully wired pipeline.
pub struct Pipeline {
    pub state: Arc<PipelineState>,
    pub coordinator: Arc<PipelineCoordinator>,
    pub controller: Arc<IngestionController>,
}

impl Pipeline {
    pub fn assemble(cfg: &AppConfig, parts: PipelineParts) -> Self {
        let state = Arc::new(PipelineState::new(
            StateLimits::from(&cfg.history),
            Arc::clone(&parts.clock),
        ));
        let resolver = TimestampResolver::new(Arc::clone(&parts.clock));

        let escalation = Arc::new(EscalationDispatcher::new(
            cfg.escalation.clone(),
            parts.calls,
            Arc::clone(&state),
        ));

        let cooldown_ms = i64::try_from(cfg.ai.cooldown().as_millis()).unwrap_or(i64::MAX);
        let detector = Arc::new(AiDetector::new(
            parts.inference,
            CooldownGate::new(Arc::clone(&parts.clock), cooldown_ms),
            Arc::clone(&state),
            resolver.clone(),
            Arc::clone(&escalation),
            DetectorSettings {
                reading_window: cfg.ai.reading_window,
                system_prompt: cfg.ai.system_prompt.clone(),
            },
        ));

        let coordinator = Arc::new(PipelineCoordinator::new(
            ReadingNormalizer::new(resolver),
            RuleEngine::new(cfg.rules.clone()),
            Arc::clone(&state),
            detector,
            escalation,
        ));

        let controller = Arc::new(IngestionController::new(parts.store, Arc::clone(&coordinator)));

        Self {
            state,
            coordinator,
            controller,
        }
    }
}
