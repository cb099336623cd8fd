//! Shared pipeline state
//!
//! Everything readers care about (history, anomaly lists, event log, ready
//! flag) lives in one immutable [`PipelineSnapshot`]. Writers publish a new
//! snapshot through `ArcSwap::rcu`, so API handlers and detectors always
//! observe a consistent whole and never block the ingestion cycle.

use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::acquisition::normalizer::sort_newest_first;
use crate::clock::SharedClock;
use crate::config::HistoryConfig;
use crate::types::{Anomaly, Event, EventKind, Reading};

/// Retention and capacity limits for the snapshot.
#[derive(Debug, Clone, Copy)]
pub struct StateLimits {
    pub max_readings: usize,
    /// Readings older than this relative to the newest reading are evicted
    pub max_age_ms: i64,
    pub anomaly_capacity: usize,
    pub event_capacity: usize,
}

impl From<&HistoryConfig> for StateLimits {
    fn from(cfg: &HistoryConfig) -> Self {
        Self {
            max_readings: cfg.max_readings,
            max_age_ms: i64::try_from(cfg.max_age_hours)
                .unwrap_or(i64::MAX / 3_600_000)
                .saturating_mul(3_600_000),
            anomaly_capacity: cfg.anomaly_capacity,
            event_capacity: cfg.event_capacity,
        }
    }
}

impl Default for StateLimits {
    fn default() -> Self {
        Self::from(&HistoryConfig::default())
    }
}

/// Immutable view of everything the pipeline has observed.
#[derive(Debug, Clone, Default)]
pub struct PipelineSnapshot {
    /// Newest first, unique by id
    pub history: Arc<Vec<Reading>>,
    /// Newest first
    pub rule_anomalies: Arc<Vec<Anomaly>>,
    /// Result of the latest AI invocation
    pub ai_anomalies: Arc<Vec<Anomaly>>,
    /// Newest first
    pub events: Arc<Vec<Event>>,
    pub ready: bool,
    pub ai_last_run_ms: Option<i64>,
    pub last_fetch_ok_ms: Option<i64>,
    pub consecutive_fetch_failures: u32,
}

impl PipelineSnapshot {
    pub fn latest(&self) -> Option<&Reading> {
        self.history.first()
    }

    /// AI anomalies of the latest invocation followed by rule anomalies.
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.ai_anomalies
            .iter()
            .chain(self.rule_anomalies.iter())
            .cloned()
            .collect()
    }

    /// Up to `n` most recent readings.
    pub fn recent(&self, n: usize) -> &[Reading] {
        &self.history[..n.min(self.history.len())]
    }
}

/// Result of merging a batch of readings into history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Readings not previously in history
    pub added: usize,
    /// Known readings whose samples changed in this snapshot
    pub revised: usize,
    /// The newest reading differs from before the commit, by id or contents
    pub latest_changed: bool,
    /// This commit flipped the ready flag
    pub became_ready: bool,
}

/// Lock-free holder of the current snapshot.
pub struct PipelineState {
    snapshot: ArcSwap<PipelineSnapshot>,
    limits: StateLimits,
    clock: SharedClock,
}

impl PipelineState {
    pub fn new(limits: StateLimits, clock: SharedClock) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(PipelineSnapshot::default()),
            limits,
            clock,
        }
    }

    pub fn snapshot(&self) -> Arc<PipelineSnapshot> {
        self.snapshot.load_full()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Merge readings into history, re-sorted newest first and trimmed to
    /// limits.
    ///
    /// A known id keeps its first-seen timestamp, but its samples follow the
    /// latest snapshot: split-format meters write their halves of a stamp
    /// separately, so an early poll can see one side zero-filled.
    pub fn commit_readings(&self, incoming: &[Reading]) -> CommitOutcome {
        let limits = self.limits;
        let now = self.clock.now_ms();
        let mut outcome = CommitOutcome::default();

        self.snapshot.rcu(|current| {
            let by_id: HashMap<&str, &Reading> =
                incoming.iter().map(|r| (r.id.as_str(), r)).collect();
            let mut revised = 0;
            let kept: Vec<Reading> = current
                .history
                .iter()
                .map(|known| match by_id.get(known.id.as_str()) {
                    Some(newer) if !same_samples(known, newer) => {
                        revised += 1;
                        Reading {
                            timestamp_ms: known.timestamp_ms,
                            ..(*newer).clone()
                        }
                    }
                    _ => known.clone(),
                })
                .collect();

            let mut seen: HashSet<&str> = current.history.iter().map(|r| r.id.as_str()).collect();
            let fresh: Vec<Reading> = incoming
                .iter()
                .filter(|r| seen.insert(r.id.as_str()))
                .cloned()
                .collect();

            let mut next = (**current).clone();
            outcome = CommitOutcome {
                added: fresh.len(),
                revised,
                ..CommitOutcome::default()
            };
            next.last_fetch_ok_ms = Some(now);
            next.consecutive_fetch_failures = 0;

            if !fresh.is_empty() || revised > 0 {
                let mut history: Vec<Reading> = kept.into_iter().chain(fresh).collect();
                sort_newest_first(&mut history);
                apply_retention(&mut history, limits);
                outcome.latest_changed = history.first() != current.latest();
                next.history = Arc::new(history);
            }

            if !next.history.is_empty() && !next.ready {
                next.ready = true;
                outcome.became_ready = true;
            }
            next
        });

        outcome
    }

    /// Clear the ready flag so the next non-empty commit announces the live
    /// connection again. History is kept.
    pub fn reset_ready(&self) {
        self.snapshot.rcu(|current| {
            let mut next = (**current).clone();
            next.ready = false;
            next
        });
    }

    /// Count a failed fetch; history and anomalies are kept.
    pub fn record_fetch_failure(&self) {
        self.snapshot.rcu(|current| {
            let mut next = (**current).clone();
            next.consecutive_fetch_failures = current.consecutive_fetch_failures.saturating_add(1);
            next
        });
    }

    /// Prepend rule anomalies, keeping the newest `anomaly_capacity`.
    pub fn push_rule_anomalies(&self, anomalies: &[Anomaly]) {
        if anomalies.is_empty() {
            return;
        }
        let cap = self.limits.anomaly_capacity;
        self.snapshot.rcu(|current| {
            let mut next = (**current).clone();
            let merged: Vec<Anomaly> = anomalies
                .iter()
                .chain(current.rule_anomalies.iter())
                .take(cap)
                .cloned()
                .collect();
            next.rule_anomalies = Arc::new(merged);
            next
        });
    }

    /// Replace the AI anomaly set with the result of an invocation.
    pub fn replace_ai_anomalies(&self, anomalies: Vec<Anomaly>, completed_ms: i64) {
        let mut anomalies = anomalies;
        anomalies.truncate(self.limits.anomaly_capacity);
        let anomalies = Arc::new(anomalies);
        self.snapshot.rcu(|current| {
            let mut next = (**current).clone();
            next.ai_anomalies = Arc::clone(&anomalies);
            next.ai_last_run_ms = Some(completed_ms);
            next
        });
    }

    /// Append an event timestamped by the clock.
    pub fn record_event(&self, kind: EventKind, message: impl Into<String>) -> Event {
        let event = Event::new(kind, message, self.clock.now_ms());
        let cap = self.limits.event_capacity;
        self.snapshot.rcu(|current| {
            let mut next = (**current).clone();
            let events: Vec<Event> = std::iter::once(event.clone())
                .chain(current.events.iter().cloned())
                .take(cap)
                .collect();
            next.events = Arc::new(events);
            next
        });
        tracing::debug!(kind = %event.kind, message = %event.message, "[Events] recorded");
        event
    }
}

fn same_samples(a: &Reading, b: &Reading) -> bool {
    a.sensor_a == b.sensor_a && a.sensor_b == b.sensor_b && a.active_source == b.active_source
}

/// Drop readings beyond the count limit or the age window. Expects
/// newest-first order.
fn apply_retention(history: &mut Vec<Reading>, limits: StateLimits) {
    if let Some(newest) = history.first().map(|r| r.timestamp_ms) {
        let cutoff = newest.saturating_sub(limits.max_age_ms);
        history.retain(|r| r.timestamp_ms >= cutoff);
    }
    history.truncate(limits.max_readings);
}
