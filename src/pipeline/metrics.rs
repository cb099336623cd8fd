//! Derived energy metrics
//!
//! Meters report a cumulative energy counter that resets when the device
//! power-cycles. Same-day consumption per sensor is `end - start` between
//! the oldest and newest reading of the day; when `start > end` the counter
//! reset mid-day and the contribution is `end` (the counter restarted at 0).

use serde::Serialize;

use crate::clock::{local_day_start_ms, next_local_day_start_ms};
use crate::config::defaults::{ENERGY_DECIMALS, ENERGY_SERIES_DAYS};
use crate::types::{Reading, SensorId};

/// Energy consumed on one local day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyEnergy {
    /// Local midnight that starts the day (epoch ms)
    pub day_start_ms: i64,
    pub kwh: f64,
}

/// Energy consumed on the local day starting at `day_start_ms` (kWh, both
/// sensors, 3 decimals). Readings dated past the next midnight are ignored.
///
/// `history` must be newest first. Fewer than two readings in range is 0.
pub fn daily_energy(history: &[Reading], day_start_ms: i64) -> f64 {
    energy_in_range(history, day_start_ms, next_local_day_start_ms(day_start_ms))
}

/// Same-day energy for the last seven local days, oldest day first. The
/// final entry is the current day.
pub fn weekly_energy(history: &[Reading], now_ms: i64) -> Vec<DailyEnergy> {
    let mut days = Vec::with_capacity(ENERGY_SERIES_DAYS);
    let mut start = local_day_start_ms(now_ms);
    let mut end = next_local_day_start_ms(start);

    for _ in 0..ENERGY_SERIES_DAYS {
        days.push(DailyEnergy {
            day_start_ms: start,
            kwh: energy_in_range(history, start, end),
        });
        end = start;
        start = local_day_start_ms(start - 1);
    }

    days.reverse();
    days
}

/// Energy between readings with `start_ms <= timestamp < end_ms`.
fn energy_in_range(history: &[Reading], start_ms: i64, end_ms: i64) -> f64 {
    let mut in_range = history
        .iter()
        .filter(|r| r.timestamp_ms >= start_ms && r.timestamp_ms < end_ms);

    let Some(newest) = in_range.next() else {
        return 0.0;
    };
    let Some(oldest) = in_range.last() else {
        return 0.0;
    };

    let total: f64 = [SensorId::A, SensorId::B]
        .into_iter()
        .map(|sensor| {
            counter_delta(
                oldest.sample(sensor).energy_cumulative,
                newest.sample(sensor).energy_cumulative,
            )
        })
        .sum();

    round_to(total, ENERGY_DECIMALS)
}

/// Counter delta with reset handling.
fn counter_delta(start: f64, end: f64) -> f64 {
    if start > end {
        end
    } else {
        end - start
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorSample;

    fn reading(id: &str, ts: i64, energy_a: f64, energy_b: f64) -> Reading {
        Reading {
            id: id.to_string(),
            timestamp_ms: ts,
            sensor_a: SensorSample {
                energy_cumulative: energy_a,
                ..SensorSample::default()
            },
            sensor_b: SensorSample {
                energy_cumulative: energy_b,
                ..SensorSample::default()
            },
            active_source: None,
        }
    }

    const DAY_START: i64 = 1_700_000_000_000;

    #[test]
    fn test_plain_delta() {
        let history = vec![
            reading("c", DAY_START + 3_000, 10.75, 4.0),
            reading("b", DAY_START + 2_000, 10.5, 3.5),
            reading("a", DAY_START + 1_000, 10.0, 3.0),
        ];
        assert_eq!(daily_energy(&history, DAY_START), 1.75);
    }

    #[test]
    fn test_counter_reset_counts_end_value() {
        // Sensor A: start 12.0, end 0.4 -> reset -> 0.4. Sensor B: 0.
        let history = vec![
            reading("b", DAY_START + 2_000, 0.4, 0.0),
            reading("a", DAY_START + 1_000, 12.0, 0.0),
        ];
        assert_eq!(daily_energy(&history, DAY_START), 0.4);
    }

    #[test]
    fn test_needs_two_readings_today() {
        let history = vec![
            reading("b", DAY_START + 2_000, 5.0, 5.0),
            reading("a", DAY_START - 1, 1.0, 1.0),
        ];
        assert_eq!(daily_energy(&history, DAY_START), 0.0);
        assert_eq!(daily_energy(&[], DAY_START), 0.0);
    }

    #[test]
    fn test_rounds_to_three_decimals() {
        let history = vec![
            reading("b", DAY_START + 2_000, 1.123_456, 0.0),
            reading("a", DAY_START + 1_000, 0.0, 0.0),
        ];
        assert_eq!(daily_energy(&history, DAY_START), 1.123);
    }

    #[test]
    fn test_weekly_series_oldest_first() {
        let now = DAY_START + 12 * 3_600_000;
        let today = local_day_start_ms(now);
        let yesterday = local_day_start_ms(today - 1);
        let history = vec![
            reading("t2", today + 2_000, 3.0, 0.0),
            reading("t1", today + 1_000, 2.0, 0.0),
            reading("y2", yesterday + 2_000, 1.5, 0.0),
            reading("y1", yesterday + 1_000, 1.0, 0.0),
        ];
        let week = weekly_energy(&history, now);
        assert_eq!(week.len(), ENERGY_SERIES_DAYS);
        assert!(week.windows(2).all(|w| w[0].day_start_ms < w[1].day_start_ms));
        assert_eq!(week[6].day_start_ms, today);
        assert_eq!(week[6].kwh, 1.0);
        assert_eq!(week[5].day_start_ms, yesterday);
        assert_eq!(week[5].kwh, 0.5);
        assert!(week[..5].iter().all(|d| d.kwh == 0.0));
    }

    #[test]
    fn test_future_readings_do_not_count_today() {
        let now = DAY_START + 12 * 3_600_000;
        let today = local_day_start_ms(now);
        let tomorrow = next_local_day_start_ms(today);
        let history = vec![
            reading("future", tomorrow + 1_000, 50.0, 0.0),
            reading("t2", today + 2_000, 3.0, 0.0),
            reading("t1", today + 1_000, 2.0, 0.0),
        ];
        let week = weekly_energy(&history, now);
        assert_eq!(week[6].kwh, 1.0);
        assert_eq!(daily_energy(&history, today), 1.0);
    }
}
