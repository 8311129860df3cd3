//! Scan report assembly and delivery

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    FindingSummary, HostSummary, Priority, ScanContext, ScanReport, ScanStatistics, Severity,
    SsvcDecision,
};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to write report {path}: {message}")]
    Write { path: String, message: String },

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receives the final report of every ended scan
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &ScanReport) -> Result<(), ReportError>;
}

/// Writes each report as `<scan_id>.json` under a directory
pub struct JsonDirectorySink {
    dir: PathBuf,
}

impl JsonDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, scan_id: &str) -> PathBuf {
        let file: String = scan_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

#[async_trait]
impl ReportSink for JsonDirectorySink {
    async fn deliver(&self, report: &ScanReport) -> Result<(), ReportError> {
        let path = self.path_for(&report.scan_id);
        let json = serde_json::to_vec_pretty(report)?;

        let write_err = |e: std::io::Error| ReportError::Write {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(write_err)?;
        tokio::fs::write(&path, json).await.map_err(write_err)?;

        tracing::info!(scan_id = %report.scan_id, path = %path.display(), "Wrote scan report");
        Ok(())
    }
}

fn by_score_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Assemble the final report from a scan's accumulated state
pub fn build_report(ctx: &ScanContext, ended_at: DateTime<Utc>, top_n: usize) -> ScanReport {
    let findings: Vec<FindingSummary> = ctx
        .hosts
        .values()
        .flat_map(|host| {
            host.findings
                .iter()
                .map(|score| FindingSummary::new(&host.host, score))
        })
        .collect();

    let statistics = statistics(ctx, &findings);

    let mut top_by_cvss = findings.clone();
    top_by_cvss.sort_by(|a, b| by_score_desc(a.cvss_base_score, b.cvss_base_score));
    top_by_cvss.truncate(top_n);

    let mut top_by_epss: Vec<FindingSummary> = findings
        .iter()
        .filter(|f| f.epss_score.is_some())
        .cloned()
        .collect();
    top_by_epss.sort_by(|a, b| by_score_desc(a.epss_score, b.epss_score));
    top_by_epss.truncate(top_n);

    let known_exploited: Vec<FindingSummary> = findings
        .iter()
        .filter(|f| f.known_exploited)
        .cloned()
        .collect();

    let ssvc_act: Vec<FindingSummary> = findings
        .iter()
        .filter(|f| f.ssvc_decision == Some(SsvcDecision::Act))
        .cloned()
        .collect();

    let mut hosts: Vec<HostSummary> = ctx
        .hosts
        .values()
        .map(|host| HostSummary {
            host: host.host.clone(),
            finding_count: host.findings.len(),
            risk_score: host.risk_score,
            open_ports: host.services.keys().copied().collect(),
        })
        .collect();
    hosts.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));

    let executive_summary = executive_summary(&ctx.scan_id, &statistics, hosts.first());

    ScanReport {
        scan_id: ctx.scan_id.clone(),
        started_at: ctx.started_at,
        ended_at,
        ai_enhancement_enabled: ctx.ai_enhancement_enabled,
        statistics,
        executive_summary,
        hosts,
        top_by_cvss,
        top_by_epss,
        known_exploited,
        ssvc_act,
        findings,
    }
}

fn statistics(ctx: &ScanContext, findings: &[FindingSummary]) -> ScanStatistics {
    let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    let mut by_priority: BTreeMap<Priority, usize> = BTreeMap::new();
    for finding in findings {
        *by_severity.entry(finding.severity).or_default() += 1;
        *by_priority.entry(finding.priority).or_default() += 1;
    }

    let unique: HashSet<&str> = findings.iter().map(|f| f.identifier.as_str()).collect();
    let risks: Vec<f64> = findings.iter().map(|f| f.risk_score).collect();
    let epss: Vec<f64> = findings.iter().filter_map(|f| f.epss_score).collect();

    ScanStatistics {
        total_findings: findings.len(),
        unique_vulnerabilities: unique.len(),
        host_count: ctx.hosts.len(),
        by_severity,
        by_priority,
        known_exploited: findings.iter().filter(|f| f.known_exploited).count(),
        ssvc_act: findings
            .iter()
            .filter(|f| f.ssvc_decision == Some(SsvcDecision::Act))
            .count(),
        ai_enriched: ctx
            .hosts
            .values()
            .flat_map(|h| &h.findings)
            .filter(|s| s.ai.is_some())
            .count(),
        average_risk_score: mean(&risks).unwrap_or(0.0),
        max_risk_score: risks.iter().copied().fold(0.0, f64::max),
        average_epss: mean(&epss),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn executive_summary(scan_id: &str, stats: &ScanStatistics, riskiest: Option<&HostSummary>) -> String {
    if stats.total_findings == 0 {
        return format!("Scan {} completed with no vulnerability findings.", scan_id);
    }

    let critical = stats.by_priority.get(&Priority::Critical).copied().unwrap_or(0);
    let mut summary = format!(
        "Scan {} identified {} findings ({} unique vulnerabilities) across {} hosts. \
         {} are known to be exploited in the wild and {} require critical-priority remediation.",
        scan_id,
        stats.total_findings,
        stats.unique_vulnerabilities,
        stats.host_count,
        stats.known_exploited,
        critical,
    );

    if let Some(host) = riskiest {
        summary.push_str(&format!(
            " Highest host risk: {} at {:.1}.",
            host.host, host.risk_score
        ));
    }
    if let Some(epss) = stats.average_epss {
        summary.push_str(&format!(
            " Mean exploitation probability (EPSS): {:.1}%.",
            epss * 100.0
        ));
    }

    summary
}
