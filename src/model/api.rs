//! OpenAI-compatible text completion service.
//!
//! Provides typed request/response structures, the error taxonomy shared by
//! the completion layer, and the [`CompletionService`] trait with an HTTP
//! implementation for `POST {api_base}/completions`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of a completion request.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The service asked us to slow down. Retryable.
    #[error("completion service rate limit: {0}")]
    RateLimited(String),
    /// The service rejected the request. Not retried.
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),
    /// Strict replay mode found no cached completion for the prompt.
    #[error(
        "no cached completion for prompt ending in {prompt_tail:?} and the cache is required"
    )]
    CacheMiss { prompt_tail: String },
    /// The optional rate-limit retry bound was reached.
    #[error("gave up after {attempts} rate-limited attempts")]
    RetriesExhausted { attempts: usize },
    /// The service answered without any choices.
    #[error("completion service returned no choices")]
    EmptyResponse,
    /// Network or decoding failure.
    #[error("completion transport error: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A text completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model (engine) name.
    pub model: String,
    /// The prompt text.
    pub prompt: String,
    /// Upper bound on generated tokens.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f64,
    /// Sequences at which generation stops.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Number of top alternatives to report per token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<usize>,
}

/// Log-probability information attached to a choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceLogProbs {
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub token_logprobs: Vec<Option<f64>>,
    /// Per-token maps of alternative token -> log probability.
    #[serde(default)]
    pub top_logprobs: Vec<Option<HashMap<String, f64>>>,
}

/// A single completion choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// The generated text.
    pub text: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub logprobs: Option<ChoiceLogProbs>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A text completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// A single-choice response carrying `text`; used by offline services.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            choices: vec![CompletionChoice {
                text: text.into(),
                index: 0,
                logprobs: None,
                finish_reason: Some("stop".into()),
            }],
            usage: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// Anything that turns a [`CompletionRequest`] into a [`CompletionResponse`].
///
/// Implementations report rate limiting as [`CompletionError::RateLimited`]
/// and rejected requests as [`CompletionError::InvalidRequest`]; the
/// completion client decides what to retry.
#[allow(async_fn_in_trait)]
pub trait CompletionService: Send + Sync {
    async fn create(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible completions API.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionService {
    /// The base URL for API requests (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// The API key used for bearer authentication.
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiCompletionService {
    /// Create a new client pointing at `base_url`.
    pub fn new(base_url: &str, api_key: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            api_base: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }
}

impl CompletionService for OpenAiCompletionService {
    async fn create(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let url = format!("{}/completions", self.api_base);
        debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            temperature = request.temperature,
            "sending completion request"
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        resp.json::<CompletionResponse>()
            .await
            .map_err(|e| {
                CompletionError::Transport(format!("failed to parse completion response: {e}"))
            })
    }
}

/// Map a non-success HTTP status onto the completion error taxonomy.
fn classify_status(status: StatusCode, body: String) -> CompletionError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited(body),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            CompletionError::InvalidRequest(body)
        }
        other => CompletionError::Transport(format!("completion API returned {other}: {body}")),
    }
}

/// Extract per-token top log-probabilities from the first choice.
pub fn extract_top_logprobs(response: &CompletionResponse) -> Vec<HashMap<String, f64>> {
    response
        .choices
        .first()
        .and_then(|choice| choice.logprobs.as_ref())
        .map(|lp| {
            lp.top_logprobs
                .iter()
                .map(|entry| entry.clone().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            CompletionError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "too long".into()),
            CompletionError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            CompletionError::Transport(_)
        ));
    }

    #[test]
    fn test_request_omits_empty_optionals() {
        let request = CompletionRequest {
            model: "m".into(),
            prompt: "p".into(),
            max_tokens: 5,
            temperature: 0.1,
            stop: Vec::new(),
            logprobs: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("stop").is_none());
        assert!(json.get("logprobs").is_none());
        assert_eq!(json["max_tokens"], 5);
    }

    #[test]
    fn test_parse_response_with_logprobs() {
        let body = r#"{
            "id": "cmpl-1",
            "choices": [{
                "text": " Right. Success.",
                "index": 0,
                "finish_reason": "stop",
                "logprobs": {
                    "tokens": [" Right", "."],
                    "token_logprobs": [-0.1, -0.01],
                    "top_logprobs": [{" Right": -0.1, " Left": -2.3}, null]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        }"#;
        let response: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.choices[0].text, " Right. Success.");

        let top = extract_top_logprobs(&response);
        assert_eq!(top.len(), 2);
        assert!((top[0][" Left"] - (-2.3)).abs() < 1e-9);
        assert!(top[1].is_empty());
    }

    #[test]
    fn test_extract_top_logprobs_absent() {
        let response = CompletionResponse::from_text("Left.");
        assert!(extract_top_logprobs(&response).is_empty());
    }
}
