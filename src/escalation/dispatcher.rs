//! Escalation Dispatcher
//!
//! Places at most one call per detection batch, for the batch's first
//! critical anomaly. Calls are fire-and-forget: the outcome only ever
//! becomes an event, never an error for the caller, and nothing is retried.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::client::{CallReceipt, CallRequest, CallTransport};
use crate::config::EscalationConfig;
use crate::pipeline::PipelineState;
use crate::types::{Anomaly, EventKind};

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Placed(CallReceipt),
    Failed(String),
    /// No transport configured (missing credential or destination)
    Disabled,
}

pub struct EscalationDispatcher {
    cfg: EscalationConfig,
    transport: Option<Arc<dyn CallTransport>>,
    state: Arc<PipelineState>,
}

impl EscalationDispatcher {
    pub fn new(
        cfg: EscalationConfig,
        transport: Option<Arc<dyn CallTransport>>,
        state: Arc<PipelineState>,
    ) -> Self {
        Self {
            cfg,
            transport,
            state,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Place one call for `anomaly` and record the outcome as an event.
    pub async fn dispatch(&self, anomaly: &Anomaly) -> DispatchOutcome {
        let Some(transport) = &self.transport else {
            warn!(kind = %anomaly.kind, "[Escalation] disabled, call not placed");
            return DispatchOutcome::Disabled;
        };

        let request = CallRequest::for_anomaly(&self.cfg, anomaly);
        match transport.place_call(&request).await {
            Ok(receipt) => {
                info!(
                    kind = %anomaly.kind,
                    call_id = receipt.call_id.as_deref().unwrap_or("-"),
                    "[Escalation] emergency call placed"
                );
                self.state.record_event(
                    EventKind::Alert,
                    format!("Emergency call triggered: {}", anomaly.kind),
                );
                DispatchOutcome::Placed(receipt)
            }
            Err(e) => {
                error!(kind = %anomaly.kind, error = %e, "[Escalation] call failed");
                self.state.record_event(
                    EventKind::Warning,
                    format!("Failed to trigger emergency call: {}", anomaly.kind),
                );
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    /// Dispatch for the first critical anomaly of a batch, if any.
    pub async fn dispatch_batch(&self, batch: &[Anomaly]) -> Option<DispatchOutcome> {
        let critical = first_critical(batch)?;
        Some(self.dispatch(critical).await)
    }

    /// Fire-and-forget variant of [`dispatch_batch`](Self::dispatch_batch).
    pub fn spawn_batch(self: &Arc<Self>, batch: &[Anomaly]) -> Option<JoinHandle<DispatchOutcome>> {
        let critical = first_critical(batch)?.clone();
        let dispatcher = Arc::clone(self);
        Some(tokio::spawn(async move { dispatcher.dispatch(&critical).await }))
    }
}

pub fn first_critical(batch: &[Anomaly]) -> Option<&Anomaly> {
    batch.iter().find(|a| a.is_critical())
}
