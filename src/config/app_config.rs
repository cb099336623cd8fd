//! Application Configuration - every tunable of the pipeline as TOML values
//!
//! Each section implements `Default` with values from [`super::defaults`],
//! so an empty or missing file behaves exactly like the built-in setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SHAKTI_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "shakti.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one meter-pair deployment.
///
/// Load with `AppConfig::load()` which searches:
/// 1. `$SHAKTI_CONFIG` env var
/// 2. `./shakti.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote telemetry store
    #[serde(default)]
    pub store: StoreConfig,

    /// Poll cadence
    #[serde(default)]
    pub polling: PollingConfig,

    /// Retention and bounded-list capacities
    #[serde(default)]
    pub history: HistoryConfig,

    /// Rule-based detector thresholds
    #[serde(default)]
    pub rules: RuleThresholds,

    /// AI-assisted detector
    #[serde(default)]
    pub ai: AiConfig,

    /// Voice-call escalation
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// HTTP read API
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order.
    ///
    /// Never fails: an unreadable or invalid file is logged and skipped.
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./shakti.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        // 3. Defaults
        info!("No {} found — using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate values for internal consistency.
    ///
    /// Rules:
    /// - Intervals, timeouts and capacities must be > 0
    /// - Low-voltage threshold must sit below the high-voltage threshold
    /// - AI temperature must be within 0.0..=2.0
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.store.url.trim().is_empty() {
            errors.push("store.url must not be empty".to_string());
        }
        if self.store.request_timeout_secs == 0 {
            errors.push("store.request_timeout_secs must be > 0".to_string());
        }
        if self.polling.interval_ms == 0 {
            errors.push("polling.interval_ms must be > 0".to_string());
        }
        if self.history.max_readings == 0 {
            errors.push("history.max_readings must be > 0".to_string());
        }
        if self.history.anomaly_capacity == 0 {
            errors.push("history.anomaly_capacity must be > 0".to_string());
        }
        if self.history.event_capacity == 0 {
            errors.push("history.event_capacity must be > 0".to_string());
        }
        if self.rules.low_voltage_v >= self.rules.high_voltage_v {
            errors.push(format!(
                "rules.low_voltage_v ({:.1}) must be < rules.high_voltage_v ({:.1})",
                self.rules.low_voltage_v, self.rules.high_voltage_v
            ));
        }
        if self.rules.overload_power_w <= 0.0 {
            errors.push("rules.overload_power_w must be > 0".to_string());
        }
        if self.ai.reading_window == 0 {
            errors.push("ai.reading_window must be > 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            errors.push(format!(
                "ai.temperature ({:.2}) must be within 0.0..=2.0",
                self.ai.temperature
            ));
        }
        if self.ai.request_timeout_secs == 0 {
            errors.push("ai.request_timeout_secs must be > 0".to_string());
        }
        if self.escalation.request_timeout_secs == 0 {
            errors.push("escalation.request_timeout_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),
    #[error("{component} is misconfigured: {reason}")]
    Component {
        component: &'static str,
        reason: String,
    },
}

/// Read a credential from the process environment.
///
/// Empty values count as missing.
pub fn credential_from_env(var: &str) -> Result<String, ConfigError> {
    credential_with(var, |name| std::env::var(name).ok())
}

/// Resolve a credential through an arbitrary lookup (tests pass a closure).
pub fn credential_with<F>(var: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingCredential(var.to_string())),
    }
}

// ============================================================================
// Store
// ============================================================================

/// Remote key-value telemetry store (polled over HTTP GET).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Full URL of the JSON document holding the readings
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Per-request timeout (seconds)
    #[serde(default = "default_store_timeout")]
    pub request_timeout_secs: u64,
}

fn default_store_url() -> String {
    "http://127.0.0.1:9000/NEW_DATA.json".to_string()
}

fn default_store_timeout() -> u64 {
    defaults::STORE_HTTP_TIMEOUT_SECS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            request_timeout_secs: default_store_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Polling
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval between store fetches (ms)
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    defaults::POLL_INTERVAL_MS
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ============================================================================
// History
// ============================================================================

/// Retention of readings and capacities of the bounded lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_readings")]
    pub max_readings: usize,

    /// Readings older than the newest reading by more than this are evicted
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,

    #[serde(default = "default_anomaly_capacity")]
    pub anomaly_capacity: usize,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_readings() -> usize {
    defaults::HISTORY_MAX_READINGS
}

fn default_max_age_hours() -> u64 {
    defaults::HISTORY_MAX_AGE_HOURS
}

fn default_anomaly_capacity() -> usize {
    defaults::ANOMALY_CAPACITY
}

fn default_event_capacity() -> usize {
    defaults::EVENT_CAPACITY
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_readings: default_max_readings(),
            max_age_hours: default_max_age_hours(),
            anomaly_capacity: default_anomaly_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ============================================================================
// Rule Thresholds
// ============================================================================

/// Fixed thresholds evaluated against the latest reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleThresholds {
    /// Critical above this voltage (V)
    #[serde(default = "default_high_voltage")]
    pub high_voltage_v: f64,

    /// Warning below this voltage (V)
    #[serde(default = "default_low_voltage")]
    pub low_voltage_v: f64,

    /// Critical above this active power (W)
    #[serde(default = "default_overload_power")]
    pub overload_power_w: f64,

    /// Low-load check applies only above this voltage (V)
    #[serde(default = "default_low_load_voltage")]
    pub low_load_min_voltage_v: f64,

    /// Low-load warning below this current (A)
    #[serde(default = "default_low_load_current")]
    pub low_load_max_current_a: f64,
}

fn default_high_voltage() -> f64 {
    defaults::HIGH_VOLTAGE_V
}

fn default_low_voltage() -> f64 {
    defaults::LOW_VOLTAGE_V
}

fn default_overload_power() -> f64 {
    defaults::OVERLOAD_POWER_W
}

fn default_low_load_voltage() -> f64 {
    defaults::LOW_LOAD_MIN_VOLTAGE_V
}

fn default_low_load_current() -> f64 {
    defaults::LOW_LOAD_MAX_CURRENT_A
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            high_voltage_v: default_high_voltage(),
            low_voltage_v: default_low_voltage(),
            overload_power_w: default_overload_power(),
            low_load_min_voltage_v: default_low_load_voltage(),
            low_load_max_current_a: default_low_load_current(),
        }
    }
}

// ============================================================================
// AI-Assisted Detection
// ============================================================================

/// Inference endpoint (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_ai_model")]
    pub model: String,

    /// System message sent with every detection prompt
    #[serde(default = "default_ai_system_prompt")]
    pub system_prompt: String,

    /// Name of the environment variable holding the bearer token
    #[serde(default = "default_ai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_ai_cooldown")]
    pub cooldown_secs: u64,

    /// Most recent readings included in each prompt
    #[serde(default = "default_ai_window")]
    pub reading_window: usize,

    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_ai_temperature")]
    pub temperature: f64,

    #[serde(default = "default_ai_timeout")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_ai_endpoint() -> String {
    defaults::AI_ENDPOINT.to_string()
}

fn default_ai_model() -> String {
    defaults::AI_MODEL.to_string()
}

fn default_ai_system_prompt() -> String {
    defaults::AI_SYSTEM_PROMPT.to_string()
}

fn default_ai_key_env() -> String {
    defaults::AI_API_KEY_ENV.to_string()
}

fn default_ai_cooldown() -> u64 {
    defaults::AI_COOLDOWN_SECS
}

fn default_ai_window() -> usize {
    defaults::AI_READING_WINDOW
}

fn default_ai_max_tokens() -> u32 {
    defaults::AI_MAX_TOKENS
}

fn default_ai_temperature() -> f64 {
    defaults::AI_TEMPERATURE
}

fn default_ai_timeout() -> u64 {
    defaults::AI_HTTP_TIMEOUT_SECS
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_ai_endpoint(),
            model: default_ai_model(),
            system_prompt: default_ai_system_prompt(),
            api_key_env: default_ai_key_env(),
            cooldown_secs: default_ai_cooldown(),
            reading_window: default_ai_window(),
            max_tokens: default_ai_max_tokens(),
            temperature: default_ai_temperature(),
            request_timeout_secs: default_ai_timeout(),
        }
    }
}

impl AiConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Escalation
// ============================================================================

/// Voice-call escalation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_escalation_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_escalation_key_env")]
    pub api_key_env: String,

    /// Destination number (E.164). Escalation is disabled when empty.
    #[serde(default)]
    pub phone_number: String,

    /// Voice identifier understood by the call service
    #[serde(default)]
    pub voice: Option<String>,

    /// Call script (pathway) identifier
    #[serde(default)]
    pub pathway_id: Option<String>,

    #[serde(default = "default_call_model")]
    pub model: String,

    #[serde(default = "default_call_language")]
    pub language: String,

    #[serde(default = "default_max_duration")]
    pub max_duration_mins: u32,

    #[serde(default = "default_voicemail_action")]
    pub voicemail_action: String,

    #[serde(default = "default_escalation_timeout")]
    pub request_timeout_secs: u64,
}

fn default_escalation_endpoint() -> String {
    defaults::ESCALATION_ENDPOINT.to_string()
}

fn default_escalation_key_env() -> String {
    defaults::ESCALATION_API_KEY_ENV.to_string()
}

fn default_call_model() -> String {
    "base".to_string()
}

fn default_call_language() -> String {
    "en".to_string()
}

fn default_max_duration() -> u32 {
    defaults::ESCALATION_MAX_DURATION_MINS
}

fn default_voicemail_action() -> String {
    "hangup".to_string()
}

fn default_escalation_timeout() -> u64 {
    defaults::ESCALATION_HTTP_TIMEOUT_SECS
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_escalation_endpoint(),
            api_key_env: default_escalation_key_env(),
            phone_number: String::new(),
            voice: None,
            pathway_id: None,
            model: default_call_model(),
            language: default_call_language(),
            max_duration_mins: default_max_duration(),
            voicemail_action: default_voicemail_action(),
            request_timeout_secs: default_escalation_timeout(),
        }
    }
}

impl EscalationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Server Config
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by the `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
