//! Anthropic messages API adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{
    DEFAULT_CONFIDENCE, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, ProviderAdapter, ProviderError,
    ProviderOutput, default_client, prompts, send_json,
};
use crate::model::{AnalysisRequest, ProviderConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeAdapter {
    client: Client,
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self {
            client: default_client(),
        }
    }

    fn build_payload(config: &ProviderConfig, request: &AnalysisRequest) -> Value {
        json!({
            "model": config.model,
            "system": prompts::system_prompt(request.task),
            "messages": [
                {"role": "user", "content": prompts::build_user_prompt(request)},
            ],
            "max_tokens": DEFAULT_MAX_TOKENS,
            "temperature": DEFAULT_TEMPERATURE,
        })
    }

    fn parse_response(config: &ProviderConfig, body: &Value) -> Result<ProviderOutput, ProviderError> {
        let content = body
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("missing content[0].text".into()))?;

        let usage = |field: &str| {
            body.pointer(&format!("/usage/{}", field))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };

        Ok(ProviderOutput {
            content: content.to_string(),
            model: body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&config.model)
                .to_string(),
            tokens_used: usage("input_tokens") + usage("output_tokens"),
            confidence: DEFAULT_CONFIDENCE,
        })
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    async fn call(
        &self,
        config: &ProviderConfig,
        request: &AnalysisRequest,
    ) -> Result<ProviderOutput, ProviderError> {
        tracing::debug!(
            model = %config.model,
            task = %request.task,
            "Sending messages request"
        );

        let builder = self
            .client
            .post(&config.endpoint)
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::build_payload(config, request));

        let body = send_json(builder, config.timeout).await?;
        Self::parse_response(config, &body)
    }
}
