//! Pipeline Coordinator - per-snapshot processing sequence
//!
//! ```text
//! PHASE 1: Normalize raw snapshot (legacy / split shapes)
//! PHASE 2: Merge into history (dedupe, sort, retention)
//! PHASE 3: Ready flag + "Live connection established" (first data only)
//! PHASE 4: Rule evaluation (ONLY if the latest reading changed)
//! PHASE 5: Escalation of the first critical rule anomaly (spawned)
//! PHASE 6: AI detection (spawned, ONLY if new readings and detector idle)
//! ```
//!
//! Phases 5-6 run on their own tasks; their failures end as events and never
//! reach the ingestion cycle.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::PipelineState;
use crate::acquisition::{ReadingNormalizer, StoreError};
use crate::detection::RuleEngine;
use crate::escalation::EscalationDispatcher;
use crate::llm::AiDetector;
use crate::types::{Anomaly, AnomalySource, EventKind, Severity};

pub const LIVE_CONNECTION_ESTABLISHED: &str = "Live connection established";
pub const LIVE_CONNECTION_INTERRUPTED: &str = "Live connection interrupted";
pub const MANUAL_TEST_ANOMALY: &str = "Manual Test Anomaly";

/// Result of one ingestion cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Readings were merged into history
    Committed { added: usize, rule_anomalies: usize },
    /// Empty or unusable payload; retried next tick
    Empty,
    /// Fetch failed; state retained
    Failed,
    /// Superseded by a newer cycle or shut down
    Cancelled,
}

/// Counters for the lifetime of the coordinator.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PipelineStats {
    pub cycles_committed: u64,
    pub cycles_empty: u64,
    pub fetch_failures: u64,
    pub readings_ingested: u64,
    pub rule_anomalies: u64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline: {} cycles ({} empty, {} failed), {} readings, {} rule anomalies",
            self.cycles_committed,
            self.cycles_empty,
            self.fetch_failures,
            self.readings_ingested,
            self.rule_anomalies
        )
    }
}

#[derive(Default)]
struct Counters {
    cycles_committed: AtomicU64,
    cycles_empty: AtomicU64,
    fetch_failures: AtomicU64,
    readings_ingested: AtomicU64,
    rule_anomalies: AtomicU64,
}

/// Runs the per-snapshot processing sequence against shared state.
pub struct PipelineCoordinator {
    normalizer: ReadingNormalizer,
    rules: RuleEngine,
    state: Arc<PipelineState>,
    detector: Arc<AiDetector>,
    escalation: Arc<EscalationDispatcher>,
    counters: Counters,
}

impl PipelineCoordinator {
    pub fn new(
        normalizer: ReadingNormalizer,
        rules: RuleEngine,
        state: Arc<PipelineState>,
        detector: Arc<AiDetector>,
        escalation: Arc<EscalationDispatcher>,
    ) -> Self {
        Self {
            normalizer,
            rules,
            state,
            detector,
            escalation,
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    pub fn detector(&self) -> &Arc<AiDetector> {
        &self.detector
    }

    pub fn escalation(&self) -> &Arc<EscalationDispatcher> {
        &self.escalation
    }

    /// Process one successfully fetched snapshot.
    pub fn ingest_snapshot(&self, payload: &Value) -> CycleOutcome {
        // PHASE 1
        let readings = self.normalizer.normalize(payload);
        if readings.is_empty() {
            debug!("[Pipeline] empty snapshot, retrying next tick");
            self.counters.cycles_empty.fetch_add(1, Ordering::Relaxed);
            return CycleOutcome::Empty;
        }

        // PHASE 2
        let commit = self.state.commit_readings(&readings);
        self.counters.cycles_committed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .readings_ingested
            .fetch_add(commit.added as u64, Ordering::Relaxed);

        // PHASE 3
        if commit.became_ready {
            info!(readings = readings.len(), "[Pipeline] live data received");
            self.state
                .record_event(EventKind::Success, LIVE_CONNECTION_ESTABLISHED);
        }

        // PHASE 4-5
        let mut rule_count = 0;
        if commit.latest_changed {
            let snapshot = self.state.snapshot();
            if let Some(latest) = snapshot.latest() {
                let anomalies = self.rules.evaluate(latest);
                rule_count = anomalies.len();
                if !anomalies.is_empty() {
                    self.record_rule_anomalies(&anomalies);
                    self.escalation.spawn_batch(&anomalies);
                }
            }
        }

        // PHASE 6
        if commit.added > 0 {
            self.detector.maybe_spawn();
        }

        CycleOutcome::Committed {
            added: commit.added,
            rule_anomalies: rule_count,
        }
    }

    fn record_rule_anomalies(&self, anomalies: &[Anomaly]) {
        self.state.push_rule_anomalies(anomalies);
        self.counters
            .rule_anomalies
            .fetch_add(anomalies.len() as u64, Ordering::Relaxed);
        for a in anomalies {
            info!(kind = %a.kind, severity = %a.severity, "[Rules] {}", a.explanation);
            self.state
                .record_event(EventKind::for_severity(a.severity), a.kind.clone());
        }
    }

    /// A fetch failed. Previous state is kept.
    pub fn record_fetch_failure(&self, err: &StoreError) {
        warn!(error = %err, "[Pipeline] telemetry fetch failed");
        self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
        self.state.record_fetch_failure();
        self.state
            .record_event(EventKind::Warning, LIVE_CONNECTION_INTERRUPTED);
    }

    /// A fetch returned a body that is not JSON. Treated as empty.
    pub fn record_malformed_payload(&self, err: &StoreError) {
        warn!(error = %err, "[Pipeline] malformed snapshot ignored");
        self.counters.cycles_empty.fetch_add(1, Ordering::Relaxed);
    }

    /// Inject a critical demo anomaly through the normal rule path,
    /// including escalation.
    pub fn trigger_test_anomaly(&self) -> Anomaly {
        let anomaly = Anomaly::new(
            MANUAL_TEST_ANOMALY,
            Severity::Critical,
            "Manually injected to verify alerting and escalation",
            self.state.now_ms(),
            AnomalySource::Rule,
        );
        let batch = [anomaly];
        self.record_rule_anomalies(&batch);
        self.escalation.spawn_batch(&batch);
        let [anomaly] = batch;
        anomaly
    }

    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            cycles_committed: self.counters.cycles_committed.load(Ordering::Relaxed),
            cycles_empty: self.counters.cycles_empty.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
            readings_ingested: self.counters.readings_ingested.load(Ordering::Relaxed),
            rule_anomalies: self.counters.rule_anomalies.load(Ordering::Relaxed),
        }
    }
}
