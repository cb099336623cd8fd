//! API request handlers
//!
//! Every handler reads one [`PipelineSnapshot`](crate::pipeline::PipelineSnapshot)
//! so a response never mixes state from two ingestion cycles.

use axum::extract::{Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::clock::local_day_start_ms;
use crate::llm::{AiRunOutcome, DetectorState};
use crate::pipeline::metrics::{daily_energy, weekly_energy, DailyEnergy};
use crate::pipeline::{PipelineCoordinator, PipelineStats, PollerProbe, PollerState};
use crate::types::{Anomaly, Event, Reading};

/// Shared state for all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<PipelineCoordinator>,
    pub poller: PollerProbe,
    /// Readings returned by `/history` without a `limit`
    pub history_default_limit: usize,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(coordinator: Arc<PipelineCoordinator>, poller: PollerProbe, history_default_limit: usize) -> Self {
        Self {
            coordinator,
            poller,
            history_default_limit,
            started_at: Instant::now(),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DetectorStatus {
    pub enabled: bool,
    pub state: DetectorState,
    pub last_run_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub poller: PollerState,
    pub ready: bool,
    pub last_fetch_ok_ms: Option<i64>,
    pub consecutive_fetch_failures: u32,
    pub ai: DetectorStatus,
    pub escalation_enabled: bool,
    pub stats: PipelineStats,
}

/// GET /api/v1/health
pub async fn get_health(State(state): State<ApiState>) -> Response {
    let snapshot = state.coordinator.state().snapshot();
    let detector = state.coordinator.detector();
    let status = if snapshot.consecutive_fetch_failures > 0 {
        "degraded"
    } else {
        "ok"
    };

    ApiResponse::ok(HealthResponse {
        status,
        uptime_secs: state.started_at.elapsed().as_secs(),
        poller: state.poller.state(),
        ready: snapshot.ready,
        last_fetch_ok_ms: snapshot.last_fetch_ok_ms,
        consecutive_fetch_failures: snapshot.consecutive_fetch_failures,
        ai: DetectorStatus {
            enabled: detector.is_enabled(),
            state: detector.state(),
            last_run_ms: snapshot.ai_last_run_ms,
        },
        escalation_enabled: state.coordinator.escalation().is_enabled(),
        stats: state.coordinator.get_stats(),
    })
}

// ============================================================================
// Live data
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LiveResponse {
    pub ready: bool,
    pub latest: Option<Reading>,
    pub total_power_w: f64,
    pub energy_today_kwh: f64,
}

/// GET /api/v1/live
pub async fn get_live(State(state): State<ApiState>) -> Response {
    let pipeline = state.coordinator.state();
    let snapshot = pipeline.snapshot();
    let day_start = local_day_start_ms(pipeline.now_ms());

    ApiResponse::ok(LiveResponse {
        ready: snapshot.ready,
        latest: snapshot.latest().cloned(),
        total_power_w: snapshot.latest().map_or(0.0, Reading::total_power),
        energy_today_kwh: daily_energy(&snapshot.history, day_start),
    })
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub total: usize,
    pub readings: Vec<Reading>,
}

/// GET /api/v1/history?limit=N
pub async fn get_history(State(state): State<ApiState>, Query(query): Query<HistoryQuery>) -> Response {
    let limit = query.limit.unwrap_or(state.history_default_limit);
    if limit == 0 {
        return ApiErrorResponse::bad_request("limit must be at least 1");
    }

    let snapshot = state.coordinator.state().snapshot();
    ApiResponse::ok(HistoryResponse {
        total: snapshot.history.len(),
        readings: snapshot.recent(limit).to_vec(),
    })
}

// ============================================================================
// Anomalies and events
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AnomaliesResponse {
    pub ai_last_run_ms: Option<i64>,
    pub ai_state: DetectorState,
    /// AI anomalies of the latest invocation, then rule anomalies
    pub anomalies: Vec<Anomaly>,
}

/// GET /api/v1/anomalies
pub async fn get_anomalies(State(state): State<ApiState>) -> Response {
    let snapshot = state.coordinator.state().snapshot();
    ApiResponse::ok(AnomaliesResponse {
        ai_last_run_ms: snapshot.ai_last_run_ms,
        ai_state: state.coordinator.detector().state(),
        anomalies: snapshot.anomalies(),
    })
}

/// GET /api/v1/events
pub async fn get_events(State(state): State<ApiState>) -> Response {
    let snapshot = state.coordinator.state().snapshot();
    let events: Vec<Event> = snapshot.events.as_ref().clone();
    ApiResponse::ok(events)
}

// ============================================================================
// Energy
// ============================================================================

/// GET /api/v1/energy/daily
pub async fn get_energy_daily(State(state): State<ApiState>) -> Response {
    let pipeline = state.coordinator.state();
    let snapshot = pipeline.snapshot();
    let day_start_ms = local_day_start_ms(pipeline.now_ms());
    ApiResponse::ok(DailyEnergy {
        day_start_ms,
        kwh: daily_energy(&snapshot.history, day_start_ms),
    })
}

/// GET /api/v1/energy/week
pub async fn get_energy_week(State(state): State<ApiState>) -> Response {
    let pipeline = state.coordinator.state();
    let snapshot = pipeline.snapshot();
    ApiResponse::ok(weekly_energy(&snapshot.history, pipeline.now_ms()))
}

// ============================================================================
// Actions
// ============================================================================

/// POST /api/v1/ai/run - manual AI invocation, bypasses the cooldown
pub async fn run_ai_detection(State(state): State<ApiState>) -> Response {
    info!("[API] manual AI detection requested");
    match state.coordinator.detector().run(true).await {
        AiRunOutcome::InFlight => ApiErrorResponse::conflict("AI detection already in progress"),
        AiRunOutcome::Disabled => {
            ApiErrorResponse::service_unavailable("AI detection is disabled (no credential configured)")
        }
        outcome => ApiResponse::ok(outcome),
    }
}

/// POST /api/v1/anomalies/test - inject a critical demo anomaly
pub async fn create_test_anomaly(State(state): State<ApiState>) -> Response {
    let anomaly = state.coordinator.trigger_test_anomaly();
    info!(id = %anomaly.id, "[API] test anomaly injected");
    ApiResponse::accepted(anomaly)
}
