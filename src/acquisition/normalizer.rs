//! Reading Normalizer
//!
//! The store has carried two payload shapes over time:
//!
//! - Split: `{"pzem1": {<stamp>: {...}}, "pzem2": {<stamp>: {...}}}`, one map
//!   per meter keyed by a timestamp string
//! - Legacy: `{<push-id>: {"timestamp"?, "pzem1"?, "pzem2"?, "activeSource"?}}`
//!
//! The shape is classified once into [`RawSnapshot`] and each variant is
//! mapped onto canonical [`Reading`]s. Field names vary between firmware
//! revisions, so every electrical field is looked up through an alias list.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use super::timestamp::TimestampResolver;
use crate::types::{Reading, SensorId, SensorSample};

/// Accepted names per sample field, in lookup order.
pub mod field_aliases {
    pub const VOLTAGE: &[&str] = &["voltage", "V", "v"];
    pub const CURRENT: &[&str] = &["current", "I", "i"];
    pub const POWER: &[&str] = &["power", "P", "p"];
    pub const ENERGY: &[&str] = &["energy", "E", "e"];
    pub const FREQUENCY: &[&str] = &["frequency", "F", "f"];
    pub const POWER_FACTOR: &[&str] = &["powerFactor", "pf", "PF", "power_factor"];
}

const TIMESTAMP_FIELD: &str = "timestamp";
const ACTIVE_SOURCE_FIELD: &str = "activeSource";

/// Payload shape, resolved once at normalization entry.
#[derive(Debug, Clone, Copy)]
pub enum RawSnapshot<'a> {
    /// Per-meter maps keyed by timestamp string. Either side may be absent.
    Split {
        sensor_a: Option<&'a Map<String, Value>>,
        sensor_b: Option<&'a Map<String, Value>>,
    },
    /// Map of reading id to combined reading object.
    Legacy(&'a Map<String, Value>),
    /// `null`, a non-object, or `{}`.
    Empty,
}

impl<'a> RawSnapshot<'a> {
    pub fn classify(value: &'a Value) -> Self {
        let Some(root) = value.as_object() else {
            return RawSnapshot::Empty;
        };
        if root.is_empty() {
            return RawSnapshot::Empty;
        }

        let key_a = SensorId::A.store_key();
        let key_b = SensorId::B.store_key();
        if root.contains_key(key_a) || root.contains_key(key_b) {
            return RawSnapshot::Split {
                sensor_a: root.get(key_a).and_then(Value::as_object),
                sensor_b: root.get(key_b).and_then(Value::as_object),
            };
        }

        RawSnapshot::Legacy(root)
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, RawSnapshot::Empty)
    }
}

/// Maps raw store payloads onto canonical readings.
#[derive(Clone)]
pub struct ReadingNormalizer {
    resolver: TimestampResolver,
}

impl ReadingNormalizer {
    pub fn new(resolver: TimestampResolver) -> Self {
        Self { resolver }
    }

    /// Normalize a payload into readings sorted newest first, unique by id.
    pub fn normalize(&self, payload: &Value) -> Vec<Reading> {
        let readings = match RawSnapshot::classify(payload) {
            RawSnapshot::Split { sensor_a, sensor_b } => self.from_split(sensor_a, sensor_b),
            RawSnapshot::Legacy(entries) => self.from_legacy(entries),
            RawSnapshot::Empty => Vec::new(),
        };
        finalize(readings)
    }

    fn from_split(
        &self,
        sensor_a: Option<&Map<String, Value>>,
        sensor_b: Option<&Map<String, Value>>,
    ) -> Vec<Reading> {
        let mut by_stamp: HashMap<&str, Reading> = HashMap::new();

        for (sensor, entries) in [(SensorId::A, sensor_a), (SensorId::B, sensor_b)] {
            let Some(entries) = entries else { continue };
            for (stamp, raw) in entries {
                let reading = by_stamp.entry(stamp.as_str()).or_insert_with(|| Reading {
                    id: stamp.clone(),
                    timestamp_ms: self.resolver.resolve_str(stamp),
                    sensor_a: SensorSample::default(),
                    sensor_b: SensorSample::default(),
                    active_source: None,
                });
                let sample = normalize_sample(raw);
                match sensor {
                    SensorId::A => reading.sensor_a = sample,
                    SensorId::B => reading.sensor_b = sample,
                }
            }
        }

        by_stamp.into_values().collect()
    }

    fn from_legacy(&self, entries: &Map<String, Value>) -> Vec<Reading> {
        entries
            .iter()
            .filter_map(|(id, raw)| {
                let obj = raw.as_object()?;

                let timestamp_ms = match obj.get(TIMESTAMP_FIELD) {
                    Some(ts) if !ts.is_null() => self.resolver.resolve_value(ts),
                    _ => self.resolver.resolve_str(id),
                };

                let sample_of = |sensor: SensorId| {
                    obj.get(sensor.store_key())
                        .map(normalize_sample)
                        .unwrap_or_default()
                };

                Some(Reading {
                    id: id.clone(),
                    timestamp_ms,
                    sensor_a: sample_of(SensorId::A),
                    sensor_b: sample_of(SensorId::B),
                    active_source: obj.get(ACTIVE_SOURCE_FIELD).and_then(coerce_integer),
                })
            })
            .collect()
    }
}

/// Drop repeated ids (first wins) and sort newest first, ties by id.
fn finalize(readings: Vec<Reading>) -> Vec<Reading> {
    let mut seen = HashSet::with_capacity(readings.len());
    let mut unique: Vec<Reading> = readings
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    sort_newest_first(&mut unique);
    unique
}

/// Canonical history order.
pub fn sort_newest_first(readings: &mut [Reading]) {
    readings.sort_by(|a, b| {
        b.timestamp_ms
            .cmp(&a.timestamp_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Map one raw meter object onto a sample. Non-objects yield all zeros.
pub fn normalize_sample(raw: &Value) -> SensorSample {
    let Some(obj) = raw.as_object() else {
        return SensorSample::default();
    };
    let field = |aliases: &[&str]| lookup(obj, aliases).and_then(coerce_number).unwrap_or(0.0);

    SensorSample {
        voltage: field(field_aliases::VOLTAGE),
        current: field(field_aliases::CURRENT),
        power: field(field_aliases::POWER),
        energy_cumulative: field(field_aliases::ENERGY),
        frequency: field(field_aliases::FREQUENCY),
        power_factor: field(field_aliases::POWER_FACTOR),
    }
}

/// First alias that is present and not null.
fn lookup<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|v| !v.is_null())
}

/// Lenient numeric coercion: numbers and numeric strings, finite only.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

#[allow(clippy::cast_possible_truncation)]
fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
