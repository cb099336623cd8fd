//! Canonical reading types.

use serde::{Deserialize, Serialize};

/// Which of the two meters a sample came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SensorId {
    /// First meter (`pzem1` in store payloads)
    A,
    /// Second meter (`pzem2` in store payloads)
    B,
}

impl SensorId {
    /// Key used for this sensor in raw store payloads.
    pub const fn store_key(self) -> &'static str {
        match self {
            SensorId::A => "pzem1",
            SensorId::B => "pzem2",
        }
    }

    /// Operator-facing label.
    pub const fn label(self) -> &'static str {
        match self {
            SensorId::A => "PZEM-1",
            SensorId::B => "PZEM-2",
        }
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One meter's electrical sample. Every field is finite; absent raw values
/// become `0.0`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SensorSample {
    /// RMS voltage (V)
    pub voltage: f64,
    /// RMS current (A)
    pub current: f64,
    /// Active power (W)
    pub power: f64,
    /// Cumulative energy counter (kWh). Non-decreasing between device resets.
    pub energy_cumulative: f64,
    /// Line frequency (Hz)
    pub frequency: f64,
    /// Power factor (0..1)
    pub power_factor: f64,
}

/// One canonical, timestamped sample from both meters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub id: String,
    pub timestamp_ms: i64,
    pub sensor_a: SensorSample,
    pub sensor_b: SensorSample,
    /// Which supply the relay board reported as active, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_source: Option<i64>,
}

impl Reading {
    pub const fn sample(&self, sensor: SensorId) -> &SensorSample {
        match sensor {
            SensorId::A => &self.sensor_a,
            SensorId::B => &self.sensor_b,
        }
    }

    /// Both samples tagged with their sensor.
    pub fn samples(&self) -> [(SensorId, &SensorSample); 2] {
        [(SensorId::A, &self.sensor_a), (SensorId::B, &self.sensor_b)]
    }

    /// Combined active power of both meters (W).
    pub fn total_power(&self) -> f64 {
        self.sensor_a.power + self.sensor_b.power
    }
}
