//! Inference client: OpenAI-compatible chat completions over HTTP.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;

/// Title sent to routing gateways that attribute traffic per application.
const CLIENT_TITLE: &str = "Shakti Grid Anomaly Detector";

/// Inference errors
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Inference service returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Response carried no completion text")]
    EmptyCompletion,
}

/// Unified seam for text-generation backends
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one completion and return the raw model text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, InferenceError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// HTTP chat-completions client
#[derive(Clone)]
pub struct HttpInferenceClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl HttpInferenceClient {
    pub fn new(cfg: &AiConfig, api_key: String) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        })
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, InferenceError> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", CLIENT_TITLE)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or(InferenceError::EmptyCompletion)
    }

    fn backend_name(&self) -> &'static str {
        "openai-compatible"
    }
}
