//! Telemetry store client
//!
//! Polls the remote key-value store over plain HTTP GET. Each request
//! carries a cache-busting `t` query parameter plus no-cache headers so
//! intermediaries never serve a stale snapshot.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::clock::SharedClock;

/// Telemetry store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Store returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("Malformed store payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    /// Transport-level failures; a malformed body is not one.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Decode(_))
    }
}

/// Source of raw snapshots.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Fetch the whole current snapshot. `Value::Null` is a valid answer.
    async fn fetch_snapshot(&self) -> Result<Value, StoreError>;
}

/// HTTP-backed telemetry store
#[derive(Clone)]
pub struct HttpTelemetryStore {
    http: reqwest::Client,
    url: String,
    clock: SharedClock,
}

impl HttpTelemetryStore {
    pub fn new(url: &str, timeout: Duration, clock: SharedClock) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            clock,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TelemetryStore for HttpTelemetryStore {
    async fn fetch_snapshot(&self) -> Result<Value, StoreError> {
        let resp = self
            .http
            .get(&self.url)
            .query(&[("t", self.clock.now_ms().to_string())])
            .header(reqwest::header::CACHE_CONTROL, "no-cache, no-store")
            .header(reqwest::header::PRAGMA, "no-cache")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StoreError::Status(status));
        }

        let body = resp.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_are_not_transient() {
        let err = serde_json::from_str::<Value>("{not json").unwrap_err();
        assert!(!StoreError::Decode(err).is_transient());
        assert!(StoreError::Status(reqwest::StatusCode::BAD_GATEWAY).is_transient());
    }
}
