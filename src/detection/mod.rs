//! Deterministic anomaly detection

pub mod rules;

pub use rules::RuleEngine;
