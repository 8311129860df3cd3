//! Scan context aggregation
//!
//! Tracks running scans, enriches each reported finding with a composite
//! vulnerability score (and optionally AI guidance), maintains per-host risk
//! and produces the final report when the scan ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use super::cache::ScoreCache;
use super::orchestrator::AnalysisService;
use super::report::{ReportSink, build_report};
use super::scoring;
use crate::model::{
    AiAssessment, AnalysisRequest, BridgeStatistics, Config, Enrichment, FindingEvent,
    HostContext, ProviderKind, ScanContext, ScanReport, ScanState, ScanStatus, Severity,
    ServiceInfo, TaskKind, VulnerabilityScore,
};
use crate::retriever::{RetrieverError, SignalSource, normalize_identifier};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Unknown scan: {0}")]
    UnknownScan(String),

    #[error("Scan already active: {0}")]
    AlreadyActive(String),

    #[error("Scan has ended: {0}")]
    Ended(String),

    #[error("Failed to score vulnerability: {0}")]
    Signal(#[from] RetrieverError),
}

#[derive(Debug, Clone)]
struct Settings {
    ai_enhancement: bool,
    ai_provider: Option<ProviderKind>,
    top_n: usize,
    score_ttl: Duration,
}

type SharedContext = Arc<tokio::sync::Mutex<ScanContext>>;

pub struct ScanAggregator {
    settings: Settings,
    source: Arc<dyn SignalSource>,
    analysis: Option<Arc<AnalysisService>>,
    sink: Option<Arc<dyn ReportSink>>,
    scores: ScoreCache,
    scans: Mutex<HashMap<String, SharedContext>>,
    stats: Mutex<BridgeStatistics>,
}

impl ScanAggregator {
    pub fn new(config: &Config, source: Arc<dyn SignalSource>) -> Self {
        Self {
            settings: Settings {
                ai_enhancement: config.scan.ai_enhancement_enabled,
                ai_provider: config.scan.ai_provider,
                top_n: config.scan.top_n,
                score_ttl: Duration::from_secs(config.feeds.score_ttl_secs),
            },
            source,
            analysis: None,
            sink: None,
            scores: ScoreCache::new(config.feeds.score_cache_entries),
            scans: Mutex::new(HashMap::new()),
            stats: Mutex::new(BridgeStatistics::default()),
        }
    }

    /// Route AI enrichment through the given analysis service
    pub fn with_analysis(mut self, analysis: Arc<AnalysisService>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Begin tracking a scan; `ai_enhancement` overrides the configured default
    pub fn start_scan(&self, scan_id: &str, ai_enhancement: Option<bool>) -> Result<ScanStatus, ScanError> {
        let ai_enhancement = ai_enhancement.unwrap_or(self.settings.ai_enhancement);
        let ctx = ScanContext::new(scan_id, ai_enhancement);
        let status = ScanStatus::from(&ctx);

        {
            let mut scans = self.scans.lock();
            if scans.contains_key(scan_id) {
                return Err(ScanError::AlreadyActive(scan_id.to_string()));
            }
            scans.insert(scan_id.to_string(), Arc::new(tokio::sync::Mutex::new(ctx)));
        }

        self.stats.lock().scans_started += 1;
        tracing::info!(scan_id = %scan_id, ai_enhancement, "Scan started");
        Ok(status)
    }

    fn context(&self, scan_id: &str) -> Option<SharedContext> {
        self.scans.lock().get(scan_id).cloned()
    }

    pub async fn status(&self, scan_id: &str) -> Option<ScanStatus> {
        let ctx = self.context(scan_id)?;
        let ctx = ctx.lock().await;
        Some(ScanStatus::from(&*ctx))
    }

    /// Score a finding, attach it to its host and return the enrichment
    ///
    /// Network work happens before the scan's lock is taken. A scan that ends
    /// while the finding is being scored rejects it.
    pub async fn finding_detected(
        &self,
        scan_id: &str,
        event: FindingEvent,
    ) -> Result<Enrichment, ScanError> {
        let ctx = self
            .context(scan_id)
            .ok_or_else(|| ScanError::UnknownScan(scan_id.to_string()))?;

        let ai_enabled = {
            let guard = ctx.lock().await;
            if guard.state == ScanState::Ended {
                return Err(ScanError::Ended(scan_id.to_string()));
            }
            guard.ai_enhancement_enabled
        };

        let mut score = self.score(&event.identifier).await?;
        if ai_enabled {
            self.enrich(&mut score, &event).await;
        }

        let enrichment = Enrichment::from(&score);

        {
            let mut guard = ctx.lock().await;
            if guard.state == ScanState::Ended {
                return Err(ScanError::Ended(scan_id.to_string()));
            }
            guard.state = ScanState::Active;

            let host = guard
                .hosts
                .entry(event.host.clone())
                .or_insert_with(|| HostContext::new(event.host.clone()));

            if event.port > 0 {
                let service = host.services.entry(event.port).or_insert_with(|| ServiceInfo {
                    port: event.port,
                    ..ServiceInfo::default()
                });
                if !service.vulnerabilities.contains(&score.id) {
                    service.vulnerabilities.push(score.id.clone());
                }
                if let Some(plugin) = &event.plugin_id {
                    if !service.plugin_ids.contains(plugin) {
                        service.plugin_ids.push(plugin.clone());
                    }
                }
            }

            host.findings.push(score.clone());
            host.risk_score = scoring::host_risk(&host.findings);

            tracing::debug!(
                scan_id = %scan_id,
                host = %event.host,
                cve = %score.id,
                host_risk = host.risk_score,
                "Recorded finding"
            );
        }

        let mut stats = self.stats.lock();
        stats.findings_detected += 1;
        if score.is_known_exploited() {
            stats.kev_findings += 1;
        }
        if score.severity() == Severity::Critical {
            stats.critical_findings += 1;
        }
        if score.ai.is_some() {
            stats.ai_enriched += 1;
        }

        Ok(enrichment)
    }

    /// Composite score for an identifier, served from the cross-scan cache when fresh
    pub async fn score(&self, identifier: &str) -> Result<VulnerabilityScore, ScanError> {
        let cve = normalize_identifier(identifier)?;

        if let Some(cached) = self.scores.get(&cve) {
            self.stats.lock().score_cache_hits += 1;
            return Ok(cached);
        }

        {
            let mut stats = self.stats.lock();
            stats.score_cache_misses += 1;
            stats.external_fetches += 1;
        }

        let score = self.source.fetch(&cve).await?;
        self.scores.set(cve, score.clone(), self.settings.score_ttl);
        Ok(score)
    }

    async fn enrich(&self, score: &mut VulnerabilityScore, event: &FindingEvent) {
        let Some(analysis) = &self.analysis else {
            return;
        };

        let mut request = AnalysisRequest::new(
            TaskKind::VulnerabilityAnalysis,
            json!({
                "cve": score.id,
                "description": score.description,
                "cvss_base_score": score.base_score(),
                "severity": score.severity(),
                "known_exploited": score.is_known_exploited(),
                "epss": score.epss_score(),
                "ssvc_decision": score.ssvc_decision(),
                "host": event.host,
                "port": event.port,
            }),
        );
        if let Some(provider) = self.settings.ai_provider {
            request = request.with_provider(provider);
        }

        let response = analysis.process_with_retry(&request).await;
        if !response.success {
            tracing::warn!(
                cve = %score.id,
                error = response.error_message.as_deref().unwrap_or_default(),
                "AI enrichment failed"
            );
            return;
        }

        let content = response.content();
        score.ai = Some(AiAssessment {
            risk_score: content
                .and_then(assessed_risk)
                .unwrap_or(score.risk_score),
            remediation_guidance: content.map(str::to_string),
            confidence: response.confidence,
        });
    }

    /// End a scan, deliver its report and forget it
    ///
    /// Unknown scan ids are ignored.
    pub async fn end_scan(&self, scan_id: &str) -> Option<ScanReport> {
        let Some(ctx) = self.scans.lock().remove(scan_id) else {
            tracing::debug!(scan_id = %scan_id, "End requested for unknown scan");
            return None;
        };

        let report = {
            let mut guard = ctx.lock().await;
            guard.state = ScanState::Ended;
            build_report(&guard, Utc::now(), self.settings.top_n)
        };

        self.stats.lock().scans_completed += 1;
        tracing::info!(
            scan_id = %scan_id,
            findings = report.statistics.total_findings,
            hosts = report.statistics.host_count,
            "Scan ended"
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.deliver(&report).await {
                tracing::error!(scan_id = %scan_id, error = %e, "Failed to deliver scan report");
            }
        }

        Some(report)
    }

    pub fn active_scans(&self) -> usize {
        self.scans.lock().len()
    }

    pub fn statistics(&self) -> BridgeStatistics {
        *self.stats.lock()
    }
}

/// Risk score stated by the provider when it answered with a JSON object
/// carrying a numeric `risk_score`; clamped to 0..=10
fn assessed_risk(content: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(content.trim()).ok()?;
    value
        .get("risk_score")?
        .as_f64()
        .filter(|r| r.is_finite())
        .map(|r| r.clamp(0.0, 10.0))
}
