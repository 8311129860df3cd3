//! OpenAI chat-completions adapter
//!
//! Also serves local and self-hosted models exposing the same wire format.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{
    DEFAULT_CONFIDENCE, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, ProviderAdapter, ProviderError,
    ProviderOutput, default_client, prompts, send_json,
};
use crate::model::{AnalysisRequest, ProviderConfig};

pub struct OpenAiAdapter {
    client: Client,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            client: default_client(),
        }
    }

    fn build_payload(config: &ProviderConfig, request: &AnalysisRequest) -> Value {
        json!({
            "model": config.model,
            "messages": [
                {"role": "system", "content": prompts::system_prompt(request.task)},
                {"role": "user", "content": prompts::build_user_prompt(request)},
            ],
            "temperature": DEFAULT_TEMPERATURE,
            "max_tokens": DEFAULT_MAX_TOKENS,
        })
    }

    fn parse_response(config: &ProviderConfig, body: &Value) -> Result<ProviderOutput, ProviderError> {
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("missing choices[0].message.content".into()))?;

        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&config.model);

        Ok(ProviderOutput {
            content: content.to_string(),
            model: model.to_string(),
            tokens_used: body
                .pointer("/usage/total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            confidence: DEFAULT_CONFIDENCE,
        })
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn call(
        &self,
        config: &ProviderConfig,
        request: &AnalysisRequest,
    ) -> Result<ProviderOutput, ProviderError> {
        tracing::debug!(
            provider = %config.provider,
            model = %config.model,
            task = %request.task,
            "Sending chat completion request"
        );

        let builder = self
            .client
            .post(&config.endpoint)
            .bearer_auth(&config.api_key)
            .json(&Self::build_payload(config, request));

        let body = send_json(builder, config.timeout).await?;
        Self::parse_response(config, &body)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{ProviderKind, TaskKind};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ProviderConfig {
        let mut config = ProviderConfig::with_defaults(ProviderKind::OpenAi, "sk-test");
        config.endpoint = format!("{}/v1/chat/completions", server.uri());
        config.model = "gpt-test".to_string();
        config
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(
            TaskKind::VulnerabilityAnalysis,
            json!({"cve": "CVE-2021-44228"}),
        )
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-test-0613",
                "choices": [{"message": {"role": "assistant", "content": "Patch now."}}],
                "usage": {"total_tokens": 123}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output = OpenAiAdapter::new()
            .call(&config(&server), &request())
            .await
            .unwrap();

        assert_eq!(output.content, "Patch now.");
        assert_eq!(output.model, "gpt-test-0613");
        assert_eq!(output.tokens_used, 123);
    }

    #[tokio::test]
    async fn test_error_body_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let err = OpenAiAdapter::new()
            .call(&config(&server), &request())
            .await
            .unwrap_err();

        match err {
            ProviderError::Http { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_content_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = OpenAiAdapter::new()
            .call(&config(&server), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.timeout = Duration::from_millis(50);

        let err = OpenAiAdapter::new().call(&config, &request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
