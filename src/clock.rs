//! Wall-clock abstraction.
//!
//! Every "now" in the pipeline (timestamp fallbacks, event stamps, the AI
//! cooldown window, the start of the local day) goes through a [`Clock`] so
//! tests can pin time.

use chrono::{Local, NaiveTime, TimeZone};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

/// Shared clock handle passed between components.
pub type SharedClock = Arc<dyn Clock>;

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Epoch milliseconds of local midnight for the day containing `now_ms`.
///
/// Falls back to UTC midnight arithmetic when the local zone cannot map the
/// instant (out-of-range timestamps).
pub fn local_day_start_ms(now_ms: i64) -> i64 {
    let Some(now) = Local.timestamp_millis_opt(now_ms).single() else {
        return now_ms - now_ms.rem_euclid(86_400_000);
    };
    now.date_naive()
        .and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .map_or_else(
            || now_ms - now_ms.rem_euclid(86_400_000),
            |midnight| midnight.timestamp_millis(),
        )
}

/// Local midnight that ends the day starting at `day_start_ms`.
///
/// Local days last 23 to 25 hours, so 26 hours past one midnight always
/// falls inside the following day.
pub fn next_local_day_start_ms(day_start_ms: i64) -> i64 {
    local_day_start_ms(day_start_ms.saturating_add(26 * 3_600_000))
}
