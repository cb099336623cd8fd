//! Pipeline Configuration Module
//!
//! Provides deployment configuration loaded from TOML files: store location,
//! polling cadence, bounded-list capacities, rule thresholds, and the
//! inference / voice-call endpoints.
//!
//! ## Loading Order
//!
//! 1. `SHAKTI_CONFIG` environment variable (path to TOML file)
//! 2. `shakti.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! Credentials never live in the file. They are read from the environment
//! variables named by `ai.api_key_env` and `escalation.api_key_env`.

mod app_config;
pub mod defaults;

pub use app_config::*;
