//! Request metrics for the analysis service
//!
//! Counters, latency distribution and per-provider usage, exposed as a
//! serializable snapshot and as Prometheus text.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use serde::Serialize;

use crate::model::{ErrorKind, ProviderKind};

const LATENCY_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    pub requests_sent: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
    pub tokens_consumed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cached_responses: u64,
    pub rate_limited_requests: u64,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub latency: LatencyStats,
    pub providers: BTreeMap<ProviderKind, ProviderStats>,
    pub errors: BTreeMap<String, u64>,
}

/// One finished request as seen by the metrics collector
#[derive(Debug, Clone, Copy)]
pub struct RequestRecord {
    pub provider: ProviderKind,
    pub success: bool,
    pub latency_ms: u64,
    pub tokens: u64,
    pub error: Option<ErrorKind>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    provider: String,
    outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ProviderLabels {
    provider: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    kind: String,
}

/// Prometheus registry and the metric families registered in it
struct Exporter {
    registry: Registry,
    requests: Counter,
    cache_hits: Counter,
    rate_limited: Counter,
    provider_requests: Family<OutcomeLabels, Counter>,
    provider_tokens: Family<ProviderLabels, Counter>,
    errors: Family<ErrorLabels, Counter>,
    latency: Histogram,
}

impl Default for Exporter {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("risk_engine");
        let requests = Counter::default();
        let cache_hits = Counter::default();
        let rate_limited = Counter::default();
        let provider_requests = Family::<OutcomeLabels, Counter>::default();
        let provider_tokens = Family::<ProviderLabels, Counter>::default();
        let errors = Family::<ErrorLabels, Counter>::default();
        let latency = Histogram::new(
            [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0].into_iter(),
        );

        registry.register("requests", "Total analysis requests", requests.clone());
        registry.register("cache_hits", "Responses served from cache", cache_hits.clone());
        registry.register(
            "rate_limited",
            "Requests rejected by the rate limiter",
            rate_limited.clone(),
        );
        registry.register(
            "provider_requests",
            "Requests per provider and outcome",
            provider_requests.clone(),
        );
        registry.register(
            "provider_tokens",
            "Tokens consumed per provider",
            provider_tokens.clone(),
        );
        registry.register("errors", "Failures by kind", errors.clone());
        registry.register(
            "request_latency_seconds",
            "Provider latency in seconds",
            latency.clone(),
        );

        Self {
            registry,
            requests,
            cache_hits,
            rate_limited,
            provider_requests,
            provider_tokens,
            errors,
            latency,
        }
    }
}

#[derive(Default)]
struct Inner {
    total: u64,
    success: u64,
    failed: u64,
    cached: u64,
    rate_limited: u64,
    latency_sum: u64,
    latency_count: u64,
    latency_min: Option<u64>,
    latency_max: u64,
    samples: VecDeque<u64>,
    providers: BTreeMap<ProviderKind, ProviderStats>,
    errors: BTreeMap<String, u64>,
    exporter: Exporter,
}

#[derive(Default)]
pub struct Metrics {
    inner: Mutex<Inner>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed provider attempt or admission failure
    pub fn record(&self, record: RequestRecord) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        if record.success {
            inner.success += 1;
        } else {
            inner.failed += 1;
        }

        inner.latency_sum += record.latency_ms;
        inner.latency_count += 1;
        inner.latency_min = Some(
            inner
                .latency_min
                .map_or(record.latency_ms, |m| m.min(record.latency_ms)),
        );
        inner.latency_max = inner.latency_max.max(record.latency_ms);
        if inner.samples.len() == LATENCY_SAMPLES {
            inner.samples.pop_front();
        }
        inner.samples.push_back(record.latency_ms);

        let stats = inner.providers.entry(record.provider).or_default();
        stats.requests_sent += 1;
        if record.success {
            stats.requests_successful += 1;
        } else {
            stats.requests_failed += 1;
        }
        stats.tokens_consumed += record.tokens;

        let provider = record.provider.as_str().to_string();
        let exporter = &inner.exporter;
        exporter.requests.inc();
        exporter.latency.observe(record.latency_ms as f64 / 1000.0);
        exporter
            .provider_requests
            .get_or_create(&OutcomeLabels {
                provider: provider.clone(),
                outcome: if record.success { "success" } else { "failure" }.to_string(),
            })
            .inc();
        exporter
            .provider_tokens
            .get_or_create(&ProviderLabels { provider })
            .inc_by(record.tokens);

        if let Some(kind) = record.error {
            let label = kind.label();
            inner
                .exporter
                .errors
                .get_or_create(&ErrorLabels { kind: label.clone() })
                .inc();
            *inner.errors.entry(label).or_default() += 1;
        }
    }

    pub fn record_cache_hit(&self) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        inner.success += 1;
        inner.cached += 1;
        inner.exporter.requests.inc();
        inner.exporter.cache_hits.inc();
    }

    pub fn record_rate_limited(&self, provider: ProviderKind) {
        self.record(RequestRecord {
            provider,
            success: false,
            latency_ms: 0,
            tokens: 0,
            error: Some(ErrorKind::RateLimited),
        });
        let mut inner = self.inner.lock();
        inner.rate_limited += 1;
        inner.exporter.rate_limited.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();

        let mut sorted: Vec<u64> = inner.samples.iter().copied().collect();
        sorted.sort_unstable();

        let latency = LatencyStats {
            min_ms: inner.latency_min.unwrap_or(0),
            max_ms: inner.latency_max,
            avg_ms: ratio(inner.latency_sum, inner.latency_count),
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
        };

        MetricsSnapshot {
            total_requests: inner.total,
            successful_requests: inner.success,
            failed_requests: inner.failed,
            cached_responses: inner.cached,
            rate_limited_requests: inner.rate_limited,
            success_rate: ratio(inner.success, inner.total),
            cache_hit_rate: ratio(inner.cached, inner.total),
            latency,
            providers: inner.providers.clone(),
            errors: inner.errors.clone(),
        }
    }

    /// Encode every registered metric in the Prometheus text exposition format
    pub fn to_prometheus(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.inner.lock().exporter.registry)?;
        Ok(buf)
    }

    /// Zero every counter, including the exported ones
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(provider: ProviderKind, latency_ms: u64) -> RequestRecord {
        RequestRecord {
            provider,
            success: true,
            latency_ms,
            tokens: 100,
            error: None,
        }
    }

    #[test]
    fn test_counters_and_rates() {
        let metrics = Metrics::new();
        metrics.record(ok(ProviderKind::OpenAi, 100));
        metrics.record(RequestRecord {
            provider: ProviderKind::OpenAi,
            success: false,
            latency_ms: 300,
            tokens: 0,
            error: Some(ErrorKind::Http { status: 500 }),
        });
        metrics.record_cache_hit();
        metrics.record_rate_limited(ProviderKind::Claude);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.successful_requests, 2);
        assert_eq!(snap.failed_requests, 2);
        assert_eq!(snap.cached_responses, 1);
        assert_eq!(snap.rate_limited_requests, 1);
        assert!((snap.success_rate - 0.5).abs() < 1e-9);
        assert!((snap.cache_hit_rate - 0.25).abs() < 1e-9);
        assert_eq!(snap.errors.get("http_500"), Some(&1));
        assert_eq!(snap.errors.get("rate_limited"), Some(&1));

        let openai = snap.providers[&ProviderKind::OpenAi];
        assert_eq!(openai.requests_sent, 2);
        assert_eq!(openai.requests_failed, 1);
        assert_eq!(openai.tokens_consumed, 100);
        assert_eq!(snap.latency.min_ms, 0);
        assert_eq!(snap.latency.max_ms, 300);
    }

    #[test]
    fn test_percentiles() {
        let metrics = Metrics::new();
        for latency in 1..=100 {
            metrics.record(ok(ProviderKind::Local, latency));
        }
        let latency = metrics.snapshot().latency;
        assert_eq!(latency.p50_ms, 50);
        assert_eq!(latency.p95_ms, 95);
        assert_eq!(latency.p99_ms, 99);
        assert!((latency.avg_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = Metrics::new().snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.latency, LatencyStats::default());
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.record(ok(ProviderKind::Claude, 42));
        metrics.record_rate_limited(ProviderKind::OpenAi);
        let text = metrics.to_prometheus().unwrap();
        assert!(text.contains("risk_engine_requests_total 2"));
        assert!(text.contains("risk_engine_rate_limited_total 1"));
        assert!(text.contains("risk_engine_provider_tokens_total{provider=\"claude\"} 100"));
        assert!(text.contains("risk_engine_errors_total{kind=\"rate_limited\"} 1"));
        assert!(text.contains("# TYPE risk_engine_request_latency_seconds histogram"));
        assert!(text.contains("risk_engine_request_latency_seconds_count 2"));
        assert!(text.ends_with("# EOF\n"));

        metrics.reset();
        let text = metrics.to_prometheus().unwrap();
        assert!(text.contains("risk_engine_requests_total 0"));
        assert!(!text.contains("provider=\"claude\""));
    }
}
