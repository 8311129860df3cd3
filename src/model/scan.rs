use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::vulnerability::{
    CvssVersion, Priority, Severity, SsvcDecision, Urgency, VulnerabilityScore,
};

/// A finding reported by the scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingEvent {
    /// Vulnerability identifier, e.g. `CVE-2021-44228`
    pub identifier: String,
    pub host: String,
    /// Port the finding was observed on; 0 when not port-bound
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub plugin_id: Option<String>,
}

/// Services observed on a host port and the findings attributed to them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub port: u16,
    pub vulnerabilities: Vec<String>,
    pub plugin_ids: Vec<String>,
}

/// Per-host accumulation of findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostContext {
    pub host: String,
    pub findings: Vec<VulnerabilityScore>,
    pub services: BTreeMap<u16, ServiceInfo>,
    pub risk_score: f64,
}

impl HostContext {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            findings: Vec::new(),
            services: BTreeMap::new(),
            risk_score: 0.0,
        }
    }
}

/// Enrichment returned to the scanner for one finding
///
/// Every signal-derived field is optional; absence means the signal was
/// unavailable, not that it was zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub identifier: String,
    pub cvss_base_score: Option<f64>,
    pub cvss_version: Option<CvssVersion>,
    pub cvss_severity: Option<Severity>,
    pub is_kev: Option<bool>,
    pub kev_due_date: Option<NaiveDate>,
    pub epss_score: Option<f64>,
    pub epss_percentile: Option<f64>,
    pub ssvc_decision: Option<SsvcDecision>,
    pub risk_score: f64,
    pub priority: Priority,
    pub urgency: Urgency,
    pub remediation_guidance: Option<String>,
}

impl From<&VulnerabilityScore> for Enrichment {
    fn from(score: &VulnerabilityScore) -> Self {
        let cvss = score.best_cvss();
        Self {
            identifier: score.id.clone(),
            cvss_base_score: cvss.map(|c| c.base_score),
            cvss_version: cvss.map(|c| c.version),
            cvss_severity: cvss.map(|c| c.severity),
            is_kev: score.kev.as_ref().map(|k| k.known_exploited),
            kev_due_date: score.kev.as_ref().and_then(|k| k.due_date),
            epss_score: score.epss.as_ref().map(|e| e.score),
            epss_percentile: score.epss.as_ref().map(|e| e.percentile),
            ssvc_decision: score.ssvc_decision(),
            risk_score: score.risk_score,
            priority: score.priority,
            urgency: score.urgency,
            remediation_guidance: score
                .ai
                .as_ref()
                .and_then(|a| a.remediation_guidance.clone()),
        }
    }
}

/// Compact finding row used in report lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingSummary {
    pub identifier: String,
    pub host: String,
    pub cvss_base_score: Option<f64>,
    pub severity: Severity,
    pub known_exploited: bool,
    pub epss_score: Option<f64>,
    pub ssvc_decision: Option<SsvcDecision>,
    pub risk_score: f64,
    pub priority: Priority,
    pub urgency: Urgency,
    pub description: Option<String>,
}

impl FindingSummary {
    pub fn new(host: &str, score: &VulnerabilityScore) -> Self {
        Self {
            identifier: score.id.clone(),
            host: host.to_string(),
            cvss_base_score: score.base_score(),
            severity: score.severity(),
            known_exploited: score.is_known_exploited(),
            epss_score: score.epss_score(),
            ssvc_decision: score.ssvc_decision(),
            risk_score: score.risk_score,
            priority: score.priority,
            urgency: score.urgency,
            description: score.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSummary {
    pub host: String,
    pub finding_count: usize,
    pub risk_score: f64,
    pub open_ports: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub total_findings: usize,
    pub unique_vulnerabilities: usize,
    pub host_count: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
    pub known_exploited: usize,
    pub ssvc_act: usize,
    pub ai_enriched: usize,
    pub average_risk_score: f64,
    pub max_risk_score: f64,
    pub average_epss: Option<f64>,
}

/// Final payload handed to the report collaborator when a scan ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub ai_enhancement_enabled: bool,
    pub statistics: ScanStatistics,
    pub executive_summary: String,
    pub hosts: Vec<HostSummary>,
    pub top_by_cvss: Vec<FindingSummary>,
    pub top_by_epss: Vec<FindingSummary>,
    pub known_exploited: Vec<FindingSummary>,
    pub ssvc_act: Vec<FindingSummary>,
    pub findings: Vec<FindingSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Created,
    Active,
    Ended,
}

/// Mutable state of one running scan
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub scan_id: String,
    pub state: ScanState,
    pub started_at: DateTime<Utc>,
    pub ai_enhancement_enabled: bool,
    pub hosts: BTreeMap<String, HostContext>,
}

impl ScanContext {
    pub fn new(scan_id: impl Into<String>, ai_enhancement_enabled: bool) -> Self {
        Self {
            scan_id: scan_id.into(),
            state: ScanState::Created,
            started_at: Utc::now(),
            ai_enhancement_enabled,
            hosts: BTreeMap::new(),
        }
    }

    pub fn finding_count(&self) -> usize {
        self.hosts.values().map(|h| h.findings.len()).sum()
    }
}

/// Point-in-time view of a scan for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub scan_id: String,
    pub state: ScanState,
    pub started_at: DateTime<Utc>,
    pub ai_enhancement_enabled: bool,
    pub host_count: usize,
    pub finding_count: usize,
}

impl From<&ScanContext> for ScanStatus {
    fn from(ctx: &ScanContext) -> Self {
        Self {
            scan_id: ctx.scan_id.clone(),
            state: ctx.state,
            started_at: ctx.started_at,
            ai_enhancement_enabled: ctx.ai_enhancement_enabled,
            host_count: ctx.hosts.len(),
            finding_count: ctx.finding_count(),
        }
    }
}

/// Counters kept across scans by the scanner bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatistics {
    pub scans_started: u64,
    pub scans_completed: u64,
    pub findings_detected: u64,
    pub kev_findings: u64,
    pub critical_findings: u64,
    pub ai_enriched: u64,
    pub external_fetches: u64,
    pub score_cache_hits: u64,
    pub score_cache_misses: u64,
}
