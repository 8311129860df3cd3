//! Analysis request orchestration
//!
//! Admission, rate limiting, response caching, in-flight deduplication,
//! provider dispatch with retry, and metrics. Every outcome is returned as an
//! [`AnalysisResponse`]; nothing here fails with an error.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;

use super::cache::ResponseCache;
use super::cache_keys::fingerprint;
use super::clock::{SharedClock, system_clock};
use super::metrics::{Metrics, RequestRecord};
use super::rate_limiter::RateLimiter;
use super::registry::ProviderRegistry;
use crate::model::{
    AnalysisRequest, AnalysisResponse, Config, ErrorKind, FeatureConfig, ProviderConfigError,
    ProviderKind, RetryConfig,
};
use crate::provider::sanitize::sanitize_request;

pub const MSG_NOT_IMPLEMENTED: &str = "provider not implemented";
pub const MSG_RATE_LIMITED: &str = "rate limit exceeded";

#[derive(Debug, Clone)]
struct Settings {
    default_provider: ProviderKind,
    cache_enabled: bool,
    cache_ttl: Duration,
    sanitize: bool,
    features: FeatureConfig,
    retry: RetryConfig,
}

type InFlight = Mutex<HashMap<String, broadcast::Sender<AnalysisResponse>>>;

/// Removes the in-flight entry even if the leading call is dropped midway
struct FlightGuard<'a> {
    in_flight: &'a InFlight,
    key: &'a str,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.key);
    }
}

enum Flight {
    Leader(broadcast::Sender<AnalysisResponse>),
    Follower(broadcast::Receiver<AnalysisResponse>),
}

/// Service context owning the provider registry, cache, limiter and metrics
pub struct AnalysisService {
    settings: Settings,
    initialized: AtomicBool,
    registry: ProviderRegistry,
    cache: ResponseCache,
    limiter: RateLimiter,
    metrics: Metrics,
    in_flight: InFlight,
}

impl AnalysisService {
    /// Build the service with the built-in adapters and the configured providers
    pub fn from_config(config: &Config) -> Result<Self, ProviderConfigError> {
        let registry = ProviderRegistry::with_default_adapters();
        for provider in config.provider_configs() {
            registry.register(provider)?;
        }
        Ok(Self::new(config, registry, system_clock()))
    }

    pub fn new(config: &Config, registry: ProviderRegistry, clock: SharedClock) -> Self {
        let limiter = RateLimiter::with_clock(
            config.rate_limit.enabled,
            config.rate_limit.requests_per_minute,
            Arc::clone(&clock),
        );
        for (provider, settings) in &config.providers {
            if let Some(rpm) = settings.requests_per_minute {
                limiter.set_budget(*provider, rpm);
            }
        }

        tracing::info!(
            enabled = config.service.enabled,
            default_provider = %config.service.default_provider,
            cache_enabled = config.cache.enabled,
            rate_limit_rpm = config.rate_limit.requests_per_minute,
            "Analysis service initialized"
        );

        Self {
            settings: Settings {
                default_provider: config.service.default_provider,
                cache_enabled: config.cache.enabled,
                cache_ttl: config.cache.default_ttl(),
                sanitize: config.security.sanitize_payloads,
                features: config.features.clone(),
                retry: config.retry.clone(),
            },
            initialized: AtomicBool::new(config.service.enabled),
            registry,
            cache: ResponseCache::with_clock(config.cache.max_entries, clock),
            limiter,
            metrics: Metrics::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Stop accepting requests and drop cached responses
    pub fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            self.cache.clear();
            tracing::info!("Analysis service shut down");
        }
    }

    pub fn is_available(&self, provider: ProviderKind) -> bool {
        self.is_initialized() && self.registry.is_available(provider)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Process one request with a single provider attempt
    pub async fn process(&self, request: &AnalysisRequest) -> AnalysisResponse {
        self.run(request, 1).await
    }

    /// Process one request, retrying transient provider failures with backoff
    ///
    /// The rate-limit budget is consumed once per request, not per attempt.
    pub async fn process_with_retry(&self, request: &AnalysisRequest) -> AnalysisResponse {
        self.run(request, self.settings.retry.max_attempts.max(1)).await
    }

    /// Process independent requests concurrently; result `i` answers request `i`
    pub async fn process_batch(&self, requests: &[AnalysisRequest]) -> Vec<AnalysisResponse> {
        tracing::debug!(count = requests.len(), "Processing analysis batch");
        join_all(requests.iter().map(|r| self.process_with_retry(r))).await
    }

    async fn run(&self, request: &AnalysisRequest, max_attempts: u32) -> AnalysisResponse {
        let provider = match self.admit(request) {
            Ok(provider) => provider,
            Err(rejection) => return rejection,
        };

        if !self.limiter.check(provider) {
            self.metrics.record_rate_limited(provider);
            tracing::warn!(provider = %provider, task = %request.task, "Request rejected by rate limiter");
            return AnalysisResponse::failure(ErrorKind::RateLimited, MSG_RATE_LIMITED);
        }

        let key = fingerprint(request, provider);

        if let Some(cached) = self.cached(&key) {
            tracing::debug!(provider = %provider, task = %request.task, "Serving response from cache");
            return cached;
        }

        let flight = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(sender) => Flight::Follower(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    in_flight.insert(key.clone(), sender.clone());
                    Flight::Leader(sender)
                }
            }
        };

        match flight {
            Flight::Leader(sender) => {
                self.lead(&key, sender, request, provider, max_attempts).await
            }
            Flight::Follower(mut receiver) => match receiver.recv().await {
                Ok(response) => {
                    tracing::debug!(provider = %provider, "Joined in-flight request");
                    if response.success {
                        self.metrics.record_cache_hit();
                    }
                    response
                }
                Err(_) => {
                    let response = self.dispatch_with_retry(request, provider, max_attempts).await;
                    self.store(&key, &response);
                    response
                }
            },
        }
    }

    /// Run the provider call on behalf of every caller sharing `key`
    ///
    /// The cache is consulted again first: a previous leader may have stored
    /// its result between this caller's cache miss and its election.
    async fn lead(
        &self,
        key: &str,
        sender: broadcast::Sender<AnalysisResponse>,
        request: &AnalysisRequest,
        provider: ProviderKind,
        max_attempts: u32,
    ) -> AnalysisResponse {
        let response = {
            let _guard = FlightGuard {
                in_flight: &self.in_flight,
                key,
            };
            match self.cached(key) {
                Some(hit) => {
                    tracing::debug!(provider = %provider, "Result stored by previous leader");
                    hit
                }
                None => {
                    let response = self.dispatch_with_retry(request, provider, max_attempts).await;
                    self.store(key, &response);
                    response
                }
            }
        };
        let _ = sender.send(response.clone());
        response
    }

    fn admit(&self, request: &AnalysisRequest) -> Result<ProviderKind, AnalysisResponse> {
        if !self.is_initialized() {
            return Err(AnalysisResponse::failure(
                ErrorKind::NotInitialized,
                "service not initialized",
            ));
        }
        if !request.input.is_object() {
            return Err(AnalysisResponse::failure(
                ErrorKind::InvalidRequest,
                "input must be a JSON object",
            ));
        }
        if !self.settings.features.is_enabled(request.task) {
            return Err(AnalysisResponse::failure(
                ErrorKind::TaskDisabled,
                format!("task {} is disabled", request.task),
            ));
        }
        Ok(request.provider.unwrap_or(self.settings.default_provider))
    }

    fn cached(&self, key: &str) -> Option<AnalysisResponse> {
        if !self.settings.cache_enabled {
            return None;
        }
        let hit = self.cache.get(key)?;
        self.metrics.record_cache_hit();
        Some(hit)
    }

    fn store(&self, key: &str, response: &AnalysisResponse) {
        if self.settings.cache_enabled && response.success {
            self.cache.set(key, response.clone(), self.settings.cache_ttl);
        }
    }

    async fn dispatch_with_retry(
        &self,
        request: &AnalysisRequest,
        provider: ProviderKind,
        max_attempts: u32,
    ) -> AnalysisResponse {
        let mut attempt = 1;
        loop {
            let response = self.dispatch(request, provider).await;

            let transient = response.error_kind.is_some_and(|k| k.is_transient());
            if response.success || !transient || attempt >= max_attempts {
                return response;
            }

            let delay = self.settings.retry.delay_for(attempt);
            tracing::warn!(
                provider = %provider,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = response.error_message.as_deref().unwrap_or_default(),
                "Transient provider failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn dispatch(&self, request: &AnalysisRequest, provider: ProviderKind) -> AnalysisResponse {
        let Some(adapter) = self.registry.adapter(provider) else {
            return self.reject(provider, ErrorKind::NotImplemented, MSG_NOT_IMPLEMENTED.to_string());
        };

        let config = match self.registry.config(provider) {
            Some(config) if config.enabled => config,
            Some(_) => {
                return self.reject(provider, ErrorKind::NotConfigured, format!("provider {} is disabled", provider));
            }
            None => {
                return self.reject(provider, ErrorKind::NotConfigured, format!("provider {} is not configured", provider));
            }
        };

        let outbound = if self.settings.sanitize {
            Cow::Owned(sanitize_request(request))
        } else {
            Cow::Borrowed(request)
        };

        let start = Instant::now();
        let result = adapter.call(&config, &outbound).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                tracing::debug!(
                    provider = %provider,
                    model = %output.model,
                    tokens = output.tokens_used,
                    elapsed_ms = latency_ms,
                    "Provider call succeeded"
                );
                self.metrics.record(RequestRecord {
                    provider,
                    success: true,
                    latency_ms,
                    tokens: output.tokens_used,
                    error: None,
                });
                AnalysisResponse::success(
                    json!({
                        "content": output.content,
                        "provider": provider.as_str(),
                        "model": output.model,
                    }),
                    output.confidence,
                    latency_ms,
                )
            }
            Err(e) => {
                tracing::error!(
                    provider = %provider,
                    error = %e,
                    elapsed_ms = latency_ms,
                    "Provider call failed"
                );
                let kind = e.kind();
                self.metrics.record(RequestRecord {
                    provider,
                    success: false,
                    latency_ms,
                    tokens: 0,
                    error: Some(kind),
                });
                AnalysisResponse::failure(kind, e.to_string()).with_latency(latency_ms)
            }
        }
    }

    fn reject(&self, provider: ProviderKind, kind: ErrorKind, message: String) -> AnalysisResponse {
        tracing::warn!(provider = %provider, error = %message, "Provider unavailable");
        self.metrics.record(RequestRecord {
            provider,
            success: false,
            latency_ms: 0,
            tokens: 0,
            error: Some(kind),
        });
        AnalysisResponse::failure(kind, message)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::model::{ProviderConfig, TaskKind};
    use crate::provider::{ProviderAdapter, ProviderError, ProviderOutput};
    use crate::service::clock::ManualClock;

    /// Adapter answering from a script, echoing the request's `n` field by default
    #[derive(Default)]
    pub(crate) struct ScriptedAdapter {
        pub calls: AtomicUsize,
        pub script: parking_lot::Mutex<VecDeque<Result<String, ProviderError>>>,
        pub delay: Duration,
        pub seen: parking_lot::Mutex<Vec<AnalysisRequest>>,
    }

    impl ScriptedAdapter {
        pub fn with_script(script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                script: parking_lot::Mutex::new(script.into()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        async fn call(
            &self,
            config: &ProviderConfig,
            request: &AnalysisRequest,
        ) -> Result<ProviderOutput, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let scripted = self.script.lock().pop_front();
            let content = match scripted {
                Some(result) => result?,
                None => format!("echo {}", request.input.get("n").cloned().unwrap_or(Value::Null)),
            };
            Ok(ProviderOutput {
                content,
                model: config.model.clone(),
                tokens_used: 10,
                confidence: 0.8,
            })
        }
    }

    pub(crate) fn test_config() -> Config {
        let mut config = Config::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        config
    }

    pub(crate) fn service_with(config: &Config, adapter: Arc<ScriptedAdapter>) -> AnalysisService {
        let registry = ProviderRegistry::empty().with_adapter(ProviderKind::OpenAi, adapter);
        registry
            .register(ProviderConfig::with_defaults(ProviderKind::OpenAi, "sk-test"))
            .unwrap();
        AnalysisService::new(config, registry, Arc::new(ManualClock::new()))
    }

    fn request(n: u32) -> AnalysisRequest {
        AnalysisRequest::new(TaskKind::VulnerabilityAnalysis, json!({"n": n}))
    }

    fn http_error(status: u16) -> ProviderError {
        ProviderError::Http {
            status,
            message: format!("HTTP {}", status),
        }
    }

    #[tokio::test]
    async fn test_identical_requests_served_from_cache() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let service = service_with(&test_config(), Arc::clone(&adapter));

        let first = service.process(&request(1)).await;
        let second = service.process(&request(1)).await;

        assert!(first.success);
        assert_eq!(first, second);
        assert_eq!(first.content(), Some("echo 1"));
        assert_eq!(first.result.as_ref().unwrap()["provider"], "openai");
        assert_eq!(adapter.calls(), 1);
        assert_eq!(service.metrics().snapshot().cached_responses, 1);
    }

    #[tokio::test]
    async fn test_new_leader_reuses_result_stored_after_cache_miss() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let service = service_with(&test_config(), Arc::clone(&adapter));
        let req = request(7);
        let key = fingerprint(&req, ProviderKind::OpenAi);

        let stored = AnalysisResponse::success(json!({"content": "stored"}), 0.8, 12);
        service.cache().set(key.clone(), stored, Duration::from_secs(60));

        let (sender, mut follower) = broadcast::channel(1);
        service.in_flight.lock().insert(key.clone(), sender.clone());

        let response = service.lead(&key, sender, &req, ProviderKind::OpenAi, 1).await;

        assert_eq!(response.content(), Some("stored"));
        assert_eq!(follower.recv().await.unwrap().content(), Some("stored"));
        assert_eq!(adapter.calls(), 0);
        assert!(service.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unimplemented_provider_is_not_cached() {
        let registry = ProviderRegistry::with_default_adapters();
        registry
            .register(ProviderConfig::with_defaults(ProviderKind::Custom, "key"))
            .unwrap();
        let service = AnalysisService::new(&test_config(), registry, Arc::new(ManualClock::new()));

        let req = request(1).with_provider(ProviderKind::Custom);
        let response = service.process(&req).await;

        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ErrorKind::NotImplemented));
        assert_eq!(response.error_message.as_deref(), Some(MSG_NOT_IMPLEMENTED));
        assert!(service.cache().is_empty());

        let again = service.process(&req).await;
        assert_eq!(again.error_kind, Some(ErrorKind::NotImplemented));
        assert_eq!(service.metrics().snapshot().cached_responses, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_request_never_dispatched() {
        let mut config = test_config();
        config.rate_limit.requests_per_minute = 1;
        let adapter = Arc::new(ScriptedAdapter::default());
        let service = service_with(&config, Arc::clone(&adapter));

        assert!(service.process(&request(1)).await.success);
        let denied = service.process(&request(2)).await;

        assert_eq!(denied.error_kind, Some(ErrorKind::RateLimited));
        assert_eq!(denied.error_message.as_deref(), Some(MSG_RATE_LIMITED));
        assert_eq!(denied.latency_ms, 0);
        assert_eq!(adapter.calls(), 1);

        let snapshot = service.metrics().snapshot();
        assert_eq!(snapshot.rate_limited_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let adapter = Arc::new(ScriptedAdapter::with_script(vec![
            Err(http_error(503)),
            Err(ProviderError::Timeout("slow".into())),
            Ok("third time lucky".into()),
        ]));
        let service = service_with(&test_config(), Arc::clone(&adapter));

        let response = service.process_with_retry(&request(1)).await;

        assert!(response.success);
        assert_eq!(response.content(), Some("third time lucky"));
        assert_eq!(adapter.calls(), 3);
        assert_eq!(service.limiter().remaining(ProviderKind::OpenAi), 59);
        assert_eq!(service.metrics().snapshot().failed_requests, 2);
    }

    #[tokio::test]
    async fn test_terminal_failure_not_retried_or_cached() {
        let adapter = Arc::new(ScriptedAdapter::with_script(vec![Err(http_error(401))]));
        let service = service_with(&test_config(), Arc::clone(&adapter));

        let response = service.process_with_retry(&request(1)).await;

        assert_eq!(response.error_kind, Some(ErrorKind::Http { status: 401 }));
        assert_eq!(adapter.calls(), 1);
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let adapter = Arc::new(ScriptedAdapter::with_script(vec![
            Err(http_error(500)),
            Err(http_error(500)),
            Err(http_error(500)),
            Ok("too late".into()),
        ]));
        let service = service_with(&test_config(), Arc::clone(&adapter));

        let response = service.process_with_retry(&request(1)).await;
        assert_eq!(response.error_kind, Some(ErrorKind::Http { status: 500 }));
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn test_admission_failures() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let service = service_with(&test_config(), Arc::clone(&adapter));

        let not_object = AnalysisRequest::new(TaskKind::ThreatModeling, json!("plain text"));
        assert_eq!(
            service.process(&not_object).await.error_kind,
            Some(ErrorKind::InvalidRequest)
        );

        let disabled = AnalysisRequest::new(TaskKind::ExploitSuggestion, json!({}));
        assert_eq!(
            service.process(&disabled).await.error_kind,
            Some(ErrorKind::TaskDisabled)
        );

        let no_adapter = request(1).with_provider(ProviderKind::Claude);
        assert_eq!(
            service.process(&no_adapter).await.error_kind,
            Some(ErrorKind::NotImplemented)
        );

        service.shutdown();
        assert!(!service.is_available(ProviderKind::OpenAi));
        assert_eq!(
            service.process(&request(1)).await.error_kind,
            Some(ErrorKind::NotInitialized)
        );
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn test_adapter_without_config_is_not_configured() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let registry = ProviderRegistry::empty().with_adapter(ProviderKind::Local, adapter);
        let service = AnalysisService::new(&test_config(), registry, Arc::new(ManualClock::new()));

        let response = service.process(&request(1).with_provider(ProviderKind::Local)).await;
        assert_eq!(response.error_kind, Some(ErrorKind::NotConfigured));
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_share_one_call() {
        let adapter = Arc::new(ScriptedAdapter {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let service = service_with(&test_config(), Arc::clone(&adapter));

        let req = request(7);
        let (a, b, c) = tokio::join!(
            service.process(&req),
            service.process(&req),
            service.process(&req)
        );

        assert_eq!(adapter.calls(), 1);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let service = service_with(&test_config(), adapter);

        let requests: Vec<AnalysisRequest> = (0..5).map(request).collect();
        let responses = service.process_batch(&requests).await;

        assert_eq!(responses.len(), 5);
        for (i, response) in responses.iter().enumerate() {
            assert_eq!(response.content(), Some(format!("echo {}", i).as_str()));
        }
    }

    #[tokio::test]
    async fn test_payload_sanitized_before_dispatch() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let service = service_with(&test_config(), Arc::clone(&adapter));

        let req = AnalysisRequest::new(
            TaskKind::VulnerabilityAnalysis,
            json!({"host": "10.1.2.3"}),
        );
        service.process(&req).await;

        let seen = adapter.seen.lock();
        assert_eq!(seen[0].input["host"], "[REDACTED_IP]");
    }
}
