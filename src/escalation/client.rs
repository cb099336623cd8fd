//! Voice-call service client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::defaults::ESCALATION_INTERRUPTION_THRESHOLD_MS;
use crate::config::EscalationConfig;
use crate::types::Anomaly;

/// Escalation errors
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Call service returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Anomaly details the call script can read out.
#[derive(Debug, Clone, Serialize)]
pub struct CallMetadata {
    pub anomaly: Anomaly,
}

/// Body of one outbound call request.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pathway_id: Option<String>,
    pub wait_for_greeting: bool,
    pub record: bool,
    pub answered_by_enabled: bool,
    pub noise_cancellation: bool,
    pub interruption_threshold: u32,
    pub block_interruptions: bool,
    pub max_duration: u32,
    pub model: String,
    pub language: String,
    pub background_track: String,
    pub voicemail_action: String,
    pub metadata: CallMetadata,
}

impl CallRequest {
    /// Fixed call parameters from config plus the anomaly being escalated.
    pub fn for_anomaly(cfg: &EscalationConfig, anomaly: &Anomaly) -> Self {
        Self {
            phone_number: cfg.phone_number.clone(),
            voice: cfg.voice.clone(),
            pathway_id: cfg.pathway_id.clone(),
            wait_for_greeting: false,
            record: true,
            answered_by_enabled: true,
            noise_cancellation: false,
            interruption_threshold: ESCALATION_INTERRUPTION_THRESHOLD_MS,
            block_interruptions: false,
            max_duration: cfg.max_duration_mins,
            model: cfg.model.clone(),
            language: cfg.language.clone(),
            background_track: "none".to_string(),
            voicemail_action: cfg.voicemail_action.clone(),
            metadata: CallMetadata {
                anomaly: anomaly.clone(),
            },
        }
    }
}

/// What the call service answered. Every field is optional because the
/// service's response schema is not under our control.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CallReceipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
}

/// Outbound call seam
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn place_call(&self, request: &CallRequest) -> Result<CallReceipt, EscalationError>;
}

/// HTTP voice-call transport
#[derive(Clone)]
pub struct HttpCallTransport {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpCallTransport {
    pub fn new(cfg: &EscalationConfig, api_key: String) -> Result<Self, EscalationError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl CallTransport for HttpCallTransport {
    async fn place_call(&self, request: &CallRequest) -> Result<CallReceipt, EscalationError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EscalationError::Status { status, body });
        }

        // A 2xx with an unexpected body still means the call was accepted
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }
}
