//! Detection prompt construction

use serde::Serialize;

use crate::types::{Reading, SensorSample};

/// Reading as presented to the model: ISO timestamps, store field names.
#[derive(Debug, Serialize)]
struct PromptReading<'a> {
    id: &'a str,
    timestamp: String,
    pzem1: PromptSample,
    pzem2: PromptSample,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptSample {
    voltage: f64,
    current: f64,
    power: f64,
    energy: f64,
    frequency: f64,
    power_factor: f64,
}

impl From<&SensorSample> for PromptSample {
    fn from(s: &SensorSample) -> Self {
        Self {
            voltage: s.voltage,
            current: s.current,
            power: s.power,
            energy: s.energy_cumulative,
            frequency: s.frequency,
            power_factor: s.power_factor,
        }
    }
}

fn iso_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Build the user prompt for a window of readings (newest first).
pub fn build_detection_prompt(readings: &[Reading]) -> Result<String, serde_json::Error> {
    let rows: Vec<PromptReading<'_>> = readings
        .iter()
        .map(|r| PromptReading {
            id: &r.id,
            timestamp: iso_timestamp(r.timestamp_ms),
            pzem1: PromptSample::from(&r.sensor_a),
            pzem2: PromptSample::from(&r.sensor_b),
        })
        .collect();
    let data = serde_json::to_string_pretty(&rows)?;

    Ok(format!(
        r#"You are an AI anomaly detection engine for a smart grid with two power meters (pzem1, pzem2).
Analyze the following REAL sensor readings (JSON array, newest first):

{data}

Return ONLY a JSON array:
[
  {{ "type": "Voltage Spike", "severity": "warning", "explanation": "...", "timestamp": "..." }}
]

severity must be one of "critical", "warning", "info".
If no anomalies, return [] ONLY."#
    ))
}
