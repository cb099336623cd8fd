//! Rule-Based Anomaly Detector
//!
//! Fixed thresholds evaluated against the latest reading only:
//!
//! | Condition                               | Kind                  | Severity |
//! |-----------------------------------------|-----------------------|----------|
//! | voltage above high limit (either)       | High Voltage          | Critical |
//! | voltage below low limit (either)        | Low Voltage           | Warning  |
//! | power above overload limit (either)     | Circuit Overload      | Critical |
//! | energised but no current (per sensor)   | Suspiciously Low Load | Warning  |
//!
//! Voltage and overload checks produce at most one anomaly each, naming every
//! sensor that matched. The low-load check runs per sensor.

use crate::config::RuleThresholds;
use crate::types::{Anomaly, AnomalySource, Reading, SensorId, SensorSample, Severity};

pub mod kinds {
    pub const HIGH_VOLTAGE: &str = "High Voltage";
    pub const LOW_VOLTAGE: &str = "Low Voltage";
    pub const CIRCUIT_OVERLOAD: &str = "Circuit Overload";
    pub const LOW_LOAD: &str = "Suspiciously Low Load";
}

/// Stateless threshold evaluator.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    thresholds: RuleThresholds,
}

impl RuleEngine {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RuleThresholds {
        &self.thresholds
    }

    /// Evaluate the rule table against one reading. Anomalies are stamped
    /// with the reading's timestamp.
    pub fn evaluate(&self, latest: &Reading) -> Vec<Anomaly> {
        let t = &self.thresholds;
        let ts = latest.timestamp_ms;
        let mut out = Vec::new();

        let high: Vec<String> = matching(latest, |s| s.voltage > t.high_voltage_v, |s| {
            format!("{:.1} V", s.voltage)
        });
        if !high.is_empty() {
            out.push(Anomaly::new(
                kinds::HIGH_VOLTAGE,
                Severity::Critical,
                format!("Voltage above {} V: {}", t.high_voltage_v, high.join(", ")),
                ts,
                AnomalySource::Rule,
            ));
        }

        let low: Vec<String> = matching(latest, |s| s.voltage < t.low_voltage_v, |s| {
            format!("{:.1} V", s.voltage)
        });
        if !low.is_empty() {
            out.push(Anomaly::new(
                kinds::LOW_VOLTAGE,
                Severity::Warning,
                format!("Voltage below {} V: {}", t.low_voltage_v, low.join(", ")),
                ts,
                AnomalySource::Rule,
            ));
        }

        let overload: Vec<String> = matching(latest, |s| s.power > t.overload_power_w, |s| {
            format!("{:.0} W", s.power)
        });
        if !overload.is_empty() {
            out.push(Anomaly::new(
                kinds::CIRCUIT_OVERLOAD,
                Severity::Critical,
                format!("Power above {} W: {}", t.overload_power_w, overload.join(", ")),
                ts,
                AnomalySource::Rule,
            ));
        }

        for (sensor, sample) in latest.samples() {
            if sample.voltage > t.low_load_min_voltage_v && sample.current < t.low_load_max_current_a {
                out.push(Anomaly::new(
                    kinds::LOW_LOAD,
                    Severity::Warning,
                    format!(
                        "{sensor} energised at {:.1} V but drawing {:.3} A",
                        sample.voltage, sample.current
                    ),
                    ts,
                    AnomalySource::Rule,
                ));
            }
        }

        if !out.is_empty() {
            tracing::debug!(reading = %latest.id, count = out.len(), "[Rules] thresholds breached");
        }
        out
    }
}

/// Describe every sensor whose sample satisfies `pred`.
fn matching(
    reading: &Reading,
    pred: impl Fn(&SensorSample) -> bool,
    describe: impl Fn(&SensorSample) -> String,
) -> Vec<String> {
    [SensorId::A, SensorId::B]
        .into_iter()
        .filter_map(|sensor| {
            let sample = reading.sample(sensor);
            pred(sample).then(|| format!("{sensor} {}", describe(sample)))
        })
        .collect()
}
