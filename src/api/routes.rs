//! API route definitions
//!
//! - /api/v1/health - poller, detector and escalation status
//! - /api/v1/live - ready flag, latest reading, today's energy
//! - /api/v1/history - most recent readings
//! - /api/v1/anomalies, /api/v1/events - bounded lists
//! - /api/v1/energy/daily, /api/v1/energy/week - derived energy
//! - /api/v1/ai/run, /api/v1/anomalies/test - manual actions

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/live", get(handlers::get_live))
        .route("/history", get(handlers::get_history))
        .route("/anomalies", get(handlers::get_anomalies))
        .route("/anomalies/test", post(handlers::create_test_anomaly))
        .route("/events", get(handlers::get_events))
        .route("/energy/daily", get(handlers::get_energy_daily))
        .route("/energy/week", get(handlers::get_energy_week))
        .route("/ai/run", post(handlers::run_ai_detection))
        .with_state(state)
}
