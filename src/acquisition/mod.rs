//! Telemetry acquisition
//!
//! Fetches raw snapshots from the telemetry store and turns them into
//! canonical readings.

pub mod normalizer;
pub mod store;
pub mod timestamp;

pub use normalizer::{RawSnapshot, ReadingNormalizer};
pub use store::{HttpTelemetryStore, StoreError, TelemetryStore};
pub use timestamp::{RawTimestamp, TimestampResolver};
