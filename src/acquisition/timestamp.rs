//! Timestamp Resolution
//!
//! Converts the timestamp encodings found in store payloads into epoch
//! milliseconds:
//!
//! - store push identifiers (20 chars over a 64-char sortable alphabet)
//! - delimited date-time strings (`YYYY-MM-DD_HH:MM:SS`, `YYYY-MM-DD HH:MM:SS`,
//!   ISO-8601 with or without offset)
//! - epoch numbers in seconds or milliseconds
//!
//! Resolution never fails. Anything uninterpretable resolves to the clock's
//! "now", which trades accuracy for availability: a reading with a garbled
//! timestamp sorts as the most recent one instead of being dropped.

use chrono::{DateTime, Local, TimeZone};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::clock::SharedClock;

/// Alphabet of store push identifiers, in sort order.
pub const PUSH_ID_ALPHABET: &str =
    "-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Length of a store push identifier.
pub const PUSH_ID_LEN: usize = 20;

/// Leading characters of a push id that encode its creation time.
const PUSH_ID_TIME_CHARS: usize = 8;

/// Values above this are already epoch milliseconds.
const MILLIS_FLOOR: i64 = 1_000_000_000_000;

/// Values above this (and not above `MILLIS_FLOOR`) are epoch seconds.
const SECONDS_FLOOR: i64 = 1_000_000_000;

/// A raw timestamp as found in a payload.
#[derive(Debug, Clone, Copy)]
pub enum RawTimestamp<'a> {
    Text(&'a str),
    Integer(i64),
    Float(f64),
}

/// Resolves raw timestamps against an injectable clock.
#[derive(Clone)]
pub struct TimestampResolver {
    clock: SharedClock,
}

impl TimestampResolver {
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Resolve any raw timestamp to epoch milliseconds.
    pub fn resolve(&self, raw: RawTimestamp<'_>) -> i64 {
        match raw {
            RawTimestamp::Text(s) => self.resolve_str(s),
            RawTimestamp::Integer(n) => self.resolve_integer(n),
            RawTimestamp::Float(f) => self.resolve_float(f),
        }
    }

    /// Resolve a JSON value (string or number); anything else is "now".
    pub fn resolve_value(&self, value: &Value) -> i64 {
        match value {
            Value::String(s) => self.resolve_str(s),
            Value::Number(n) => match n.as_i64() {
                Some(i) => self.resolve_integer(i),
                None => self.resolve_float(n.as_f64().unwrap_or(f64::NAN)),
            },
            _ => self.now_ms(),
        }
    }

    pub fn resolve_str(&self, raw: &str) -> i64 {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return self.now_ms();
        }

        if is_push_id(trimmed) {
            if let Some(ms) = decode_push_id(trimmed) {
                return ms;
            }
        }

        if let Some(ms) = parse_date_time(trimmed) {
            return ms;
        }

        // Fully numeric strings are epoch values
        if let Ok(i) = trimmed.parse::<i64>() {
            return self.resolve_integer(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return self.resolve_float(f);
        }

        self.now_ms()
    }

    pub fn resolve_integer(&self, n: i64) -> i64 {
        if n > MILLIS_FLOOR {
            n
        } else if n > SECONDS_FLOOR {
            n.checked_mul(1_000).unwrap_or_else(|| self.now_ms())
        } else {
            self.now_ms()
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn resolve_float(&self, f: f64) -> i64 {
        if !f.is_finite() {
            return self.now_ms();
        }
        if f > MILLIS_FLOOR as f64 {
            if f >= i64::MAX as f64 {
                return self.now_ms();
            }
            f as i64
        } else if f > SECONDS_FLOOR as f64 {
            (f * 1_000.0).round() as i64
        } else {
            self.now_ms()
        }
    }
}

/// Whether `s` has the shape of a store push identifier.
pub fn is_push_id(s: &str) -> bool {
    s.len() == PUSH_ID_LEN && s.chars().all(|c| PUSH_ID_ALPHABET.contains(c))
}

/// Decode the creation-time counter of a push identifier.
///
/// Only approximates wall-clock time: it is whatever clock the writer had
/// when the id was generated.
pub fn decode_push_id(id: &str) -> Option<i64> {
    let mut timestamp: i64 = 0;
    for c in id.chars().take(PUSH_ID_TIME_CHARS) {
        let value = PUSH_ID_ALPHABET.find(c)?;
        timestamp = timestamp * 64 + i64::try_from(value).ok()?;
    }
    Some(timestamp)
}

fn date_time_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2})(?::(\d{2}))?").ok())
        .as_ref()
}

/// Date-time chain: RFC 3339 as given, RFC 3339 with a UTC marker appended,
/// then component extraction interpreted as local time.
fn parse_date_time(raw: &str) -> Option<i64> {
    let normalized = raw.replace(['_', ' '], "T");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.timestamp_millis());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{normalized}Z")) {
        return Some(dt.timestamp_millis());
    }

    let caps = date_time_pattern()?.captures(&normalized)?;
    let field = |i: usize| -> Option<u32> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let year = i32::try_from(field(1)?).ok()?;
    let local = Local
        .with_ymd_and_hms(year, field(2)?, field(3)?, field(4)?, field(5)?, field(6)?)
        .earliest()?;
    Some(local.timestamp_millis())
}
