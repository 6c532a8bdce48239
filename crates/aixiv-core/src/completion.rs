//! Completion-service interface and its HTTP implementation.
//!
//! The orchestration core only ever sees [`CompletionService`]: given a
//! prompt, a model id and sampling parameters it returns generated text or
//! a typed [`StageError`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CompletionConfig;
use crate::domain::error::StageError;

/// Sampling parameters forwarded to the completion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// One completion call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub params: SamplingParams,
}

/// External text-generation capability.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, StageError>;
}

// ---------------------------------------------------------------------------
// HttpCompletionClient
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Messages-API client over `reqwest`.
pub struct HttpCompletionClient {
    config: CompletionConfig,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, StageError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("aixiv-core/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StageError::ServiceUnavailable(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    fn classify(&self, err: reqwest::Error) -> StageError {
        if err.is_timeout() {
            StageError::Timeout(self.config.timeout_secs * 1000)
        } else if err.is_decode() {
            StageError::InvalidOutput(err.to_string())
        } else {
            StageError::ServiceUnavailable(err.to_string())
        }
    }
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, StageError> {
        let body = MessagesBody {
            model: &request.model,
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let mut builder = self
            .http
            .post(&self.config.url)
            .header("anthropic-version", &self.config.api_version)
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-api-key", key);
        }

        debug!(model = %request.model, prompt_len = request.prompt.len(), "completion request");
        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| self.classify(e))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect();
        if text.trim().is_empty() {
            return Err(StageError::InvalidOutput("empty completion".to_string()));
        }
        Ok(text)
    }
}

/// Error for a non-success HTTP status. Only 408, 429 and 5xx are worth
/// another attempt; any other 4xx means the request itself is wrong.
fn status_error(status: reqwest::StatusCode, body: &str) -> StageError {
    let detail = match body.trim() {
        "" => format!("HTTP {status}"),
        text => format!("HTTP {status}: {}", text.chars().take(200).collect::<String>()),
    };
    match status {
        reqwest::StatusCode::TOO_MANY_REQUESTS => StageError::RateLimited(detail),
        reqwest::StatusCode::REQUEST_TIMEOUT => StageError::ServiceUnavailable(detail),
        s if s.is_client_error() => StageError::Rejected(detail),
        _ => StageError::ServiceUnavailable(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::RetryClass;
    use reqwest::StatusCode;

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            let err = status_error(status, r#"{"error":"invalid x-api-key"}"#);
            assert!(matches!(err, StageError::Rejected(_)), "{status}");
            assert_eq!(err.retry_class(), RetryClass::Fatal);
        }
    }

    #[test]
    fn throttling_and_server_errors_stay_transient() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            StageError::RateLimited(_)
        ));
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let err = status_error(status, "");
            assert!(matches!(err, StageError::ServiceUnavailable(_)), "{status}");
            assert_eq!(err.retry_class(), RetryClass::Transient);
        }
    }

    #[test]
    fn long_error_bodies_are_clipped() {
        let err = status_error(StatusCode::BAD_REQUEST, &"x".repeat(1000));
        assert!(err.to_string().len() < 300);
    }
}
