//! The Narrative Oracle seam.
//!
//! The QA engine never talks to a model directly. It asks an [`Oracle`] for
//! a free-text judgment and copes with whatever comes back. This crate
//! provides:
//! - The [`Oracle`] trait (`infer(prompt) -> text`)
//! - [`OracleError`], the failure modes callers are expected to absorb
//! - [`ClaudeOracle`], a minimal Messages API backend

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: usize = 2048;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors that can occur when consulting an oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Oracle call timed out after {0:?}")]
    Timeout(Duration),
}

/// A source of free-text narrative judgments.
///
/// Implementations may be slow, may fail, and may return text in any shape.
/// Callers must treat the output as untrusted.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Answer a prompt with free text.
    async fn infer(&self, prompt: &str) -> Result<String, OracleError>;

    /// A short name used in logs.
    fn name(&self) -> &str {
        "oracle"
    }
}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for Arc<T> {
    async fn infer(&self, prompt: &str) -> Result<String, OracleError> {
        (**self).infer(prompt).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ============================================================================
// Claude backend
// ============================================================================

/// Oracle backed by the Anthropic Messages API.
#[derive(Clone)]
pub struct ClaudeOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: Option<f32>,
    system: Option<String>,
}

impl ClaudeOracle {
    /// Create a new oracle with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: Some(0.2),
            system: None,
        }
    }

    /// Create an oracle from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, OracleError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| OracleError::NoApiKey)?;
        Ok(Self::new(api_key))
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the maximum tokens per answer.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    /// Set a system prompt sent with every call.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// The configured model.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_headers(&self) -> Result<HeaderMap, OracleError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| OracleError::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: self.system.as_deref(),
            temperature: self.temperature,
            messages: vec![ApiMessage {
                role: "user",
                content: prompt,
            }],
        }
    }
}

#[async_trait]
impl Oracle for ClaudeOracle {
    async fn infer(&self, prompt: &str) -> Result<String, OracleError> {
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{API_BASE}/messages"))
            .headers(headers)
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(REQUEST_TIMEOUT)
                } else {
                    OracleError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        tracing::debug!(
            model = %api_response.model,
            output_tokens = api_response.usage.output_tokens,
            "oracle answered"
        );

        Ok(api_response.text())
    }

    fn name(&self) -> &str {
        "claude"
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ApiContent>,
    #[serde(default)]
    usage: ApiUsage,
}

impl ApiResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ApiContent::Text { text } => Some(text.as_str()),
                ApiContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    output_tokens: usize,
}
