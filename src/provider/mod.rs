//! AI provider adapters
//!
//! Each adapter translates an [`AnalysisRequest`] into one vendor's wire
//! format, performs the HTTP call and extracts the generated text.

mod claude;
mod openai;
pub mod prompts;
pub mod sanitize;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::model::{AnalysisRequest, ErrorKind, ProviderConfig};

pub use claude::ClaudeAdapter;
pub use openai::OpenAiAdapter;

const DEFAULT_TEMPERATURE: f64 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Confidence attached to free-text provider answers
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::Connection(_) => ErrorKind::Connection,
            ProviderError::Http { status, .. } => ErrorKind::Http { status: *status },
            ProviderError::Parse(_) => ErrorKind::Parse,
            ProviderError::Request(_) => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() {
            ProviderError::Connection(err.to_string())
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Request(err.to_string())
        }
    }
}

/// Text produced by a provider plus usage accounting
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOutput {
    pub content: String,
    pub model: String,
    pub tokens_used: u64,
    pub confidence: f64,
}

/// Trait for provider adapters
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Run one analysis request against the configured provider
    async fn call(
        &self,
        config: &ProviderConfig,
        request: &AnalysisRequest,
    ) -> Result<ProviderOutput, ProviderError>;
}

/// Send a prepared request and decode the JSON body
///
/// Non-success statuses become [`ProviderError::Http`] carrying the
/// provider's `error.message` when present.
async fn send_json(builder: RequestBuilder, timeout: Duration) -> Result<Value, ProviderError> {
    let response = builder.timeout(timeout).send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            status: status.as_u16(),
            message: error_message(status.as_u16(), &body),
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))
}

fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {}", status))
}

fn default_client() -> Client {
    Client::builder()
        .user_agent(concat!("risk-intel-engine/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_body() {
        let body = r#"{"error": {"message": "Invalid API key", "type": "auth"}}"#;
        assert_eq!(error_message(401, body), "Invalid API key");
    }

    #[test]
    fn test_error_message_fallback() {
        assert_eq!(error_message(502, "<html>bad gateway</html>"), "HTTP 502");
        assert_eq!(error_message(500, r#"{"detail": "x"}"#), "HTTP 500");
    }

    #[test]
    fn test_error_kinds() {
        let err = ProviderError::Http {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Http { status: 429 });
        assert!(err.kind().is_transient());
        assert!(!ProviderError::Parse("x".into()).kind().is_transient());
    }
}
