//! AI analysis request/response types and provider configuration

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Kind of analysis requested from an AI provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    VulnerabilityAnalysis,
    ThreatModeling,
    ScanOptimization,
    ReportGeneration,
    ExploitSuggestion,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::VulnerabilityAnalysis => "vulnerability_analysis",
            TaskKind::ThreatModeling => "threat_modeling",
            TaskKind::ScanOptimization => "scan_optimization",
            TaskKind::ReportGeneration => "report_generation",
            TaskKind::ExploitSuggestion => "exploit_suggestion",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an AI provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Claude,
    Local,
    Custom,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Claude,
        ProviderKind::Local,
        ProviderKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Local => "local",
            ProviderKind::Custom => "custom",
        }
    }

    /// Parse a provider name as used in configuration and environment
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "claude" | "anthropic" => Some(ProviderKind::Claude),
            "local" => Some(ProviderKind::Local),
            "custom" => Some(ProviderKind::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderConfigError {
    #[error("{0}: credential must not be empty")]
    MissingCredential(ProviderKind),

    #[error("{0}: endpoint must not be empty")]
    MissingEndpoint(ProviderKind),

    #[error("{0}: invalid endpoint URL: {1}")]
    InvalidEndpoint(ProviderKind, String),

    #[error("{0}: model must not be empty")]
    MissingModel(ProviderKind),

    #[error("{0}: timeout must be positive")]
    InvalidTimeout(ProviderKind),
}

impl ProviderConfig {
    /// Build a config with the provider's stock endpoint and model
    pub fn with_defaults(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        let (endpoint, model) = match provider {
            ProviderKind::OpenAi => ("https://api.openai.com/v1/chat/completions", "gpt-4o-mini"),
            ProviderKind::Claude => ("https://api.anthropic.com/v1/messages", "claude-3-5-sonnet-latest"),
            ProviderKind::Local | ProviderKind::Custom => {
                ("http://localhost:8080/v1/chat/completions", "local-model")
            }
        };

        Self {
            provider,
            api_key: api_key.into(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            timeout: Duration::from_secs(30),
            enabled: true,
        }
    }

    /// Check that the config is usable before it enters the registry
    pub fn validate(&self) -> Result<(), ProviderConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderConfigError::MissingCredential(self.provider));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ProviderConfigError::MissingEndpoint(self.provider));
        }
        Url::parse(&self.endpoint)
            .map_err(|e| ProviderConfigError::InvalidEndpoint(self.provider, e.to_string()))?;
        if self.model.trim().is_empty() {
            return Err(ProviderConfigError::MissingModel(self.provider));
        }
        if self.timeout.is_zero() {
            return Err(ProviderConfigError::InvalidTimeout(self.provider));
        }
        Ok(())
    }
}

/// A request for AI analysis
///
/// The input payload is an arbitrary JSON object. `provider` selects the
/// registered provider; when absent the service default is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub task: TaskKind,
    pub input: Value,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
}

impl AnalysisRequest {
    pub fn new(task: TaskKind, input: Value) -> Self {
        Self {
            task,
            input,
            context: None,
            provider: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }
}

/// Failure category carried by an unsuccessful response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotInitialized,
    InvalidRequest,
    TaskDisabled,
    RateLimited,
    NotConfigured,
    NotImplemented,
    Timeout,
    Connection,
    Http { status: u16 },
    Parse,
    Internal,
}

impl ErrorKind {
    /// Whether a retry may succeed where this attempt failed
    pub fn is_transient(&self) -> bool {
        match self {
            ErrorKind::Timeout | ErrorKind::Connection => true,
            ErrorKind::Http { status } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Stable label used for metrics
    pub fn label(&self) -> String {
        match self {
            ErrorKind::NotInitialized => "not_initialized".to_string(),
            ErrorKind::InvalidRequest => "invalid_request".to_string(),
            ErrorKind::TaskDisabled => "task_disabled".to_string(),
            ErrorKind::RateLimited => "rate_limited".to_string(),
            ErrorKind::NotConfigured => "not_configured".to_string(),
            ErrorKind::NotImplemented => "not_implemented".to_string(),
            ErrorKind::Timeout => "timeout".to_string(),
            ErrorKind::Connection => "connection".to_string(),
            ErrorKind::Http { status } => format!("http_{}", status),
            ErrorKind::Parse => "parse".to_string(),
            ErrorKind::Internal => "internal".to_string(),
        }
    }
}

/// Outcome of an analysis request
///
/// Failures are ordinary values: `success` is false and `error_kind` and
/// `error_message` are populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub result: Option<Value>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub confidence: f64,
    pub latency_ms: u64,
}

impl AnalysisResponse {
    pub fn success(result: Value, confidence: f64, latency_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error_kind: None,
            error_message: None,
            confidence: confidence.clamp(0.0, 1.0),
            latency_ms,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            confidence: 0.0,
            latency_ms: 0,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Text content produced by the provider, if any
    pub fn content(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("content"))
            .and_then(Value::as_str)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        for provider in ProviderKind::ALL {
            let config = ProviderConfig::with_defaults(provider, "key");
            assert!(config.validate().is_ok(), "{provider} defaults should validate");
        }
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut config = ProviderConfig::with_defaults(ProviderKind::OpenAi, "");
        assert_eq!(
            config.validate(),
            Err(ProviderConfigError::MissingCredential(ProviderKind::OpenAi))
        );

        config.api_key = "sk-test".to_string();
        config.model = " ".to_string();
        assert_eq!(
            config.validate(),
            Err(ProviderConfigError::MissingModel(ProviderKind::OpenAi))
        );

        config.model = "gpt-4o".to_string();
        config.timeout = Duration::ZERO;
        assert_eq!(
            config.validate(),
            Err(ProviderConfigError::InvalidTimeout(ProviderKind::OpenAi))
        );
    }

    #[test]
    fn test_validate_rejects_unparseable_endpoint() {
        let mut config = ProviderConfig::with_defaults(ProviderKind::Claude, "key");
        config.endpoint = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ProviderConfigError::InvalidEndpoint(ProviderKind::Claude, _))
        ));
    }

    #[test]
    fn test_transient_error_kinds() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Connection.is_transient());
        assert!(ErrorKind::Http { status: 429 }.is_transient());
        assert!(ErrorKind::Http { status: 503 }.is_transient());
        assert!(!ErrorKind::Http { status: 401 }.is_transient());
        assert!(!ErrorKind::Parse.is_transient());
        assert!(!ErrorKind::NotImplemented.is_transient());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(ProviderKind::parse("OpenAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("anthropic"), Some(ProviderKind::Claude));
        assert_eq!(ProviderKind::parse("bogus"), None);
    }
}
