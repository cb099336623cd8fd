//! System-wide default constants.
//!
//! Centralises the numbers the pipeline falls back to when no config file
//! overrides them. Grouped by subsystem for easy discovery.

// ============================================================================
// Ingestion
// ============================================================================

/// Interval between telemetry store polls (ms).
pub const POLL_INTERVAL_MS: u64 = 2_000;

/// HTTP timeout for a single store fetch (seconds).
///
/// Kept below a handful of poll intervals so a hung store cannot pile up
/// cancelled requests.
pub const STORE_HTTP_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// History & bounded lists
// ============================================================================

/// Maximum number of canonical readings retained in memory.
pub const HISTORY_MAX_READINGS: usize = 5_000;

/// Retention window for readings (hours). 168 = 7 days, enough for the
/// weekly energy series.
pub const HISTORY_MAX_AGE_HOURS: u64 = 168;

/// Capacity of the rule-sourced anomaly list (most recent first).
pub const ANOMALY_CAPACITY: usize = 10;

/// Capacity of the event log (most recent first).
pub const EVENT_CAPACITY: usize = 20;

// ============================================================================
// Rule thresholds
// ============================================================================

pub const HIGH_VOLTAGE_V: f64 = 260.0;
pub const LOW_VOLTAGE_V: f64 = 180.0;
pub const OVERLOAD_POWER_W: f64 = 6_000.0;
pub const LOW_LOAD_MIN_VOLTAGE_V: f64 = 200.0;
pub const LOW_LOAD_MAX_CURRENT_A: f64 = 0.01;

// ============================================================================
// Derived metrics
// ============================================================================

/// Decimal places kept on energy totals (kWh).
pub const ENERGY_DECIMALS: i32 = 3;

/// Number of days in the rolling energy series.
pub const ENERGY_SERIES_DAYS: usize = 7;

// ============================================================================
// AI-assisted detection
// ============================================================================

/// Minimum time between automatic inference calls, measured from the end of
/// the previous call (seconds).
pub const AI_COOLDOWN_SECS: u64 = 45;

/// Most recent readings sent to the inference endpoint per call.
pub const AI_READING_WINDOW: usize = 50;

/// Maximum time to wait for a single inference response (seconds).
pub const AI_HTTP_TIMEOUT_SECS: u64 = 30;

pub const AI_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const AI_MODEL: &str = "deepseek/deepseek-chat";
pub const AI_SYSTEM_PROMPT: &str = "You detect anomalies and return JSON only.";
pub const AI_MAX_TOKENS: u32 = 300;
pub const AI_TEMPERATURE: f64 = 0.4;
pub const AI_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Explanation used when the model omits one.
pub const AI_MISSING_EXPLANATION: &str = "No explanation provided";

/// Kind used when the model omits one.
pub const AI_UNKNOWN_KIND: &str = "AI: Unknown";

// ============================================================================
// Escalation
// ============================================================================

pub const ESCALATION_ENDPOINT: &str = "https://api.bland.ai/v1/calls";
pub const ESCALATION_API_KEY_ENV: &str = "BLAND_API_KEY";

/// HTTP timeout for voice-call dispatch (seconds).
pub const ESCALATION_HTTP_TIMEOUT_SECS: u64 = 15;

/// Maximum call duration requested from the voice service (minutes).
pub const ESCALATION_MAX_DURATION_MINS: u32 = 12;

pub const ESCALATION_INTERRUPTION_THRESHOLD_MS: u32 = 500;

// ============================================================================
// HTTP API
// ============================================================================

pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Default page size for `/api/v1/history`.
pub const API_HISTORY_DEFAULT_LIMIT: usize = 50;
