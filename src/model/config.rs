use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::analysis::{ProviderConfig, ProviderKind, TaskKind};

const ENV_CONFIG_PATH: &str = "RISK_ENGINE_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub enabled: bool,
    pub worker_pool_size: usize,
    /// Pending jobs accepted before submitters wait for capacity
    pub queue_depth: usize,
    pub default_timeout_secs: u64,
    pub default_provider: ProviderKind,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_pool_size: 8,
            queue_depth: 64,
            default_timeout_secs: 30,
            default_provider: ProviderKind::OpenAi,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry (1-based), doubling per attempt
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Per-task enable flags
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub vulnerability_analysis: bool,
    pub threat_modeling: bool,
    pub scan_optimization: bool,
    pub report_generation: bool,
    pub exploit_suggestion: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            vulnerability_analysis: true,
            threat_modeling: true,
            scan_optimization: true,
            report_generation: true,
            exploit_suggestion: false,
        }
    }
}

impl FeatureConfig {
    pub fn is_enabled(&self, task: TaskKind) -> bool {
        match task {
            TaskKind::VulnerabilityAnalysis => self.vulnerability_analysis,
            TaskKind::ThreatModeling => self.threat_modeling,
            TaskKind::ScanOptimization => self.scan_optimization,
            TaskKind::ReportGeneration => self.report_generation,
            TaskKind::ExploitSuggestion => self.exploit_suggestion,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Redact addresses from payloads before they leave the process
    pub sanitize_payloads: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            sanitize_payloads: true,
        }
    }
}

/// Provider section as written in the config file; missing fields fall back
/// to the provider's stock settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub enabled: Option<bool>,
    pub requests_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub nvd_base_url: String,
    pub nvd_api_key: Option<String>,
    pub nvd_delay_ms: u64,
    pub kev_url: String,
    pub kev_catalog_ttl_secs: u64,
    pub epss_base_url: String,
    pub epss_delay_ms: u64,
    pub ssvc_base_url: String,
    pub ssvc_delay_ms: u64,
    pub timeout_secs: u64,
    /// Lifetime of computed scores shared across scans
    pub score_ttl_secs: u64,
    pub score_cache_entries: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            nvd_base_url: "https://services.nvd.nist.gov/rest/json/cves/2.0".to_string(),
            nvd_api_key: None,
            nvd_delay_ms: 6000,
            kev_url: "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json"
                .to_string(),
            kev_catalog_ttl_secs: 6 * 60 * 60,
            epss_base_url: "https://api.first.org/data/v1/epss".to_string(),
            epss_delay_ms: 1000,
            ssvc_base_url: "https://api.first.org/data/v1/ssvc".to_string(),
            ssvc_delay_ms: 1000,
            timeout_secs: 30,
            score_ttl_secs: 24 * 60 * 60,
            score_cache_entries: 5000,
        }
    }
}

impl FeedConfig {
    /// NVD permits a much tighter request spacing for keyed clients
    pub fn effective_nvd_delay(&self) -> Duration {
        match self.nvd_api_key {
            Some(_) => Duration::from_millis(self.nvd_delay_ms.min(600)),
            None => Duration::from_millis(self.nvd_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub ai_enhancement_enabled: bool,
    pub ai_provider: Option<ProviderKind>,
    pub top_n: usize,
    /// Directory receiving one JSON report per finished scan
    pub report_dir: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ai_enhancement_enabled: false,
            ai_provider: None,
            top_n: 10,
            report_dir: None,
        }
    }
}

/// Application configuration
///
/// Layers, lowest to highest: built-in defaults, the YAML config file,
/// environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub service: ServiceConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub features: FeatureConfig,
    pub security: SecurityConfig,
    pub providers: BTreeMap<ProviderKind, ProviderSettings>,
    pub feeds: FeedConfig,
    pub scan: ScanConfig,
}

impl Config {
    /// Load configuration from config file and environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = Self::load_config_file(&config_path)?.unwrap_or_default();
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from YAML file; a missing or empty file yields `None`
    pub fn load_config_file(path: &str) -> Result<Option<Self>, ConfigError> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(None);
        }

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let contents = contents.trim();
        if contents.is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(None);
        }

        let config = Self::from_yaml(contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(path = %path.display(), "Loaded configuration from file");
        Ok(Some(config))
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Overlay environment variables on top of the current values
    ///
    /// The lookup is injected so tests do not have to mutate process state.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(enabled) = lookup("RISK_ENGINE_ENABLED").and_then(|v| parse_bool(&v)) {
            self.service.enabled = enabled;
        }
        if let Some(size) = lookup("RISK_ENGINE_WORKERS").and_then(|v| v.parse().ok()) {
            self.service.worker_pool_size = size;
        }
        if let Some(provider) = lookup("RISK_ENGINE_DEFAULT_PROVIDER").and_then(|v| ProviderKind::parse(&v)) {
            self.service.default_provider = provider;
        }
        if let Some(ttl) = lookup("RISK_ENGINE_CACHE_TTL").and_then(|v| v.parse().ok()) {
            self.cache.default_ttl_secs = ttl;
        }
        if let Some(entries) = lookup("RISK_ENGINE_CACHE_MAX_ENTRIES").and_then(|v| v.parse().ok()) {
            self.cache.max_entries = entries;
        }
        if let Some(rpm) = lookup("RISK_ENGINE_RATE_LIMIT_RPM").and_then(|v| v.parse().ok()) {
            self.rate_limit.requests_per_minute = rpm;
        }
        if let Some(enabled) = lookup("RISK_ENGINE_AI_ENHANCEMENT").and_then(|v| parse_bool(&v)) {
            self.scan.ai_enhancement_enabled = enabled;
        }
        if let Some(dir) = lookup("RISK_ENGINE_REPORT_DIR") {
            self.scan.report_dir = Some(dir);
        }

        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.providers.entry(ProviderKind::OpenAi).or_default().api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.providers.entry(ProviderKind::OpenAi).or_default().model = Some(model);
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.providers.entry(ProviderKind::Claude).or_default().api_key = Some(key);
        }
        if let Some(model) = lookup("ANTHROPIC_MODEL") {
            self.providers.entry(ProviderKind::Claude).or_default().model = Some(model);
        }
        if let Some(endpoint) = lookup("LOCAL_LLM_ENDPOINT") {
            self.providers.entry(ProviderKind::Local).or_default().endpoint = Some(endpoint);
        }

        if let Some(key) = lookup("NVD_API_KEY") {
            self.feeds.nvd_api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.worker_pool_size == 0 {
            return Err(ConfigError::Invalid("service.worker_pool_size must be positive".into()));
        }
        if self.service.queue_depth == 0 {
            return Err(ConfigError::Invalid("service.queue_depth must be positive".into()));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be positive".into()));
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.requests_per_minute must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Resolve provider sections into concrete configs
    ///
    /// Providers without a credential are skipped; the local provider accepts
    /// a placeholder credential since local endpoints rarely require one.
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .filter_map(|(provider, settings)| {
                let api_key = match (&settings.api_key, provider) {
                    (Some(key), _) => key.clone(),
                    (None, ProviderKind::Local) => "local".to_string(),
                    (None, _) => return None,
                };

                let mut config = ProviderConfig::with_defaults(*provider, api_key);
                if let Some(endpoint) = &settings.endpoint {
                    config.endpoint = endpoint.clone();
                }
                if let Some(model) = &settings.model {
                    config.model = model.clone();
                }
                config.timeout = Duration::from_secs(
                    settings.timeout_secs.unwrap_or(self.service.default_timeout_secs),
                );
                if let Some(enabled) = settings.enabled {
                    config.enabled = enabled;
                }
                Some(config)
            })
            .collect()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.service.enabled);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert!(!config.features.exploit_suggestion);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides_only_given_fields() {
        let yaml = r#"
cache:
  default_ttl_secs: 120
rate_limit:
  requests_per_minute: 5
providers:
  claude:
    api_key: sk-ant-test
    model: claude-test
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.cache.default_ttl_secs, 120);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.rate_limit.requests_per_minute, 5);
        assert!(config.rate_limit.enabled);

        let providers = config.provider_configs();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].provider, ProviderKind::Claude);
        assert_eq!(providers[0].model, "claude-test");
        assert_eq!(providers[0].endpoint, "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn test_env_wins_over_file() {
        let yaml = r#"
server:
  port: 9000
cache:
  default_ttl_secs: 120
"#;
        let mut config = Config::from_yaml(yaml).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9100"),
            ("OPENAI_API_KEY", "sk-env"),
            ("RISK_ENGINE_AI_ENHANCEMENT", "true"),
        ]);
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.cache.default_ttl_secs, 120);
        assert!(config.scan.ai_enhancement_enabled);
        let providers = config.provider_configs();
        assert_eq!(providers[0].provider, ProviderKind::OpenAi);
        assert_eq!(providers[0].api_key, "sk-env");
    }

    #[test]
    fn test_provider_without_key_is_skipped() {
        let yaml = r#"
providers:
  openai:
    model: gpt-4o
  local:
    endpoint: http://127.0.0.1:11434/v1/chat/completions
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let providers = config.provider_configs();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].provider, ProviderKind::Local);
        assert_eq!(providers[0].api_key, "local");
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.service.worker_pool_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_nvd_delay_with_api_key() {
        let mut feeds = FeedConfig::default();
        assert_eq!(feeds.effective_nvd_delay(), Duration::from_millis(6000));
        feeds.nvd_api_key = Some("key".into());
        assert_eq!(feeds.effective_nvd_delay(), Duration::from_millis(600));
    }
}
