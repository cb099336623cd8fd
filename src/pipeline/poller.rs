//! Ingestion Controller
//!
//! A single interval timer drives ingestion. Every tick spawns one fetch
//! cycle on its own task, so a slow store never delays the next tick, and
//! gives it a child cancellation token. A new tick cancels the previous
//! cycle's token; stopping the poller cancels all of them. Cancellation is
//! not an error and leaves no trace in the event log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::coordinator::{CycleOutcome, PipelineCoordinator};
use crate::acquisition::TelemetryStore;

/// Observable poller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PollerState {
    Polling,
    Stopped,
}

/// Fetches snapshots and hands them to the coordinator.
pub struct IngestionController {
    store: Arc<dyn TelemetryStore>,
    coordinator: Arc<PipelineCoordinator>,
}

impl IngestionController {
    pub fn new(store: Arc<dyn TelemetryStore>, coordinator: Arc<PipelineCoordinator>) -> Self {
        Self { store, coordinator }
    }

    pub fn coordinator(&self) -> &Arc<PipelineCoordinator> {
        &self.coordinator
    }

    /// Run one fetch cycle under `cancel`.
    pub async fn poll_once(&self, cancel: CancellationToken) -> CycleOutcome {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return CycleOutcome::Cancelled,
            result = self.store.fetch_snapshot() => result,
        };
        // A newer cycle may have superseded this one while the body arrived
        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        match fetched {
            Ok(payload) => self.coordinator.ingest_snapshot(&payload),
            Err(e) if !e.is_transient() => {
                self.coordinator.record_malformed_payload(&e);
                CycleOutcome::Empty
            }
            Err(e) => {
                self.coordinator.record_fetch_failure(&e);
                CycleOutcome::Failed
            }
        }
    }

    /// Start the polling loop. The first fetch happens immediately.
    pub fn start_polling(self: &Arc<Self>, interval: Duration, parent: &CancellationToken) -> PollerHandle {
        let token = parent.child_token();
        let polling = Arc::new(AtomicBool::new(true));

        let controller = Arc::clone(self);
        let loop_token = token.clone();
        let loop_polling = Arc::clone(&polling);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut in_flight: Option<CancellationToken> = None;

            info!(interval_ms = interval.as_millis() as u64, "[Poller] started");
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(previous) = in_flight.take() {
                            previous.cancel();
                        }
                        let cycle = loop_token.child_token();
                        in_flight = Some(cycle.clone());
                        let controller = Arc::clone(&controller);
                        tokio::spawn(async move {
                            let outcome = controller.poll_once(cycle).await;
                            debug!(?outcome, "[Poller] cycle finished");
                        });
                    }
                }
            }

            if let Some(previous) = in_flight.take() {
                previous.cancel();
            }
            loop_polling.store(false, Ordering::SeqCst);
            info!("[Poller] stopped");
        });

        PollerHandle {
            token,
            polling,
            task,
        }
    }
}

/// Handle to a running polling loop.
pub struct PollerHandle {
    token: CancellationToken,
    polling: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn state(&self) -> PollerState {
        if self.polling.load(Ordering::SeqCst) {
            PollerState::Polling
        } else {
            PollerState::Stopped
        }
    }

    /// Shared view of the state for status reporting.
    pub fn state_probe(&self) -> PollerProbe {
        PollerProbe {
            polling: Arc::clone(&self.polling),
        }
    }

    /// Cancel the loop and any in-flight cycle, then wait for the loop to
    /// exit.
    pub async fn stop(self) {
        self.token.cancel();
        self.wait().await;
    }

    /// Wait for the loop to exit (after the parent token is cancelled).
    pub async fn wait(self) {
        // The loop task never panics; a JoinError here means runtime shutdown
        let _ = self.task.await;
        self.polling.store(false, Ordering::SeqCst);
    }
}

/// Read-only poller state shared with the API.
#[derive(Clone)]
pub struct PollerProbe {
    polling: Arc<AtomicBool>,
}

impl PollerProbe {
    pub fn state(&self) -> PollerState {
        if self.polling.load(Ordering::SeqCst) {
            PollerState::Polling
        } else {
            PollerState::Stopped
        }
    }

    /// Probe for a poller that was never started.
    pub fn stopped() -> Self {
        Self {
            polling: Arc::new(AtomicBool::new(false)),
        }
    }
}
