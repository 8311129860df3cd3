use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Qualitative CVSS severity band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a CVSS v3 base score onto its severity band
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s <= 0.0 => Severity::None,
            s if s < 4.0 => Severity::Low,
            s if s < 7.0 => Severity::Medium,
            s if s < 9.0 => Severity::High,
            _ => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CvssVersion {
    #[serde(rename = "2.0")]
    V2,
    #[serde(rename = "3.0")]
    V30,
    #[serde(rename = "3.1")]
    V31,
}

/// One CVSS representation as published by NVD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvssScore {
    pub version: CvssVersion,
    pub base_score: f64,
    pub vector: Option<String>,
    pub severity: Severity,
}

impl CvssScore {
    pub fn new(version: CvssVersion, base_score: f64, vector: Option<String>) -> Self {
        Self {
            version,
            base_score,
            vector,
            severity: Severity::from_score(base_score),
        }
    }
}

/// Entry from the known-exploited-vulnerabilities catalog
///
/// `known_exploited == false` means the catalog was consulted and the
/// identifier is not listed, which is different from not having KEV data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KevRecord {
    pub known_exploited: bool,
    pub date_added: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub required_action: Option<String>,
    pub known_ransomware_use: Option<String>,
    pub notes: Option<String>,
}

impl KevRecord {
    pub fn not_listed() -> Self {
        Self {
            known_exploited: false,
            date_added: None,
            due_date: None,
            required_action: None,
            known_ransomware_use: None,
            notes: None,
        }
    }
}

/// Exploit prediction score for an identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpssRecord {
    pub score: f64,
    pub percentile: f64,
    pub date: Option<NaiveDate>,
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SsvcDecision {
    Track,
    #[serde(rename = "track*")]
    TrackStar,
    Attend,
    Act,
}

impl SsvcDecision {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "track" => Some(SsvcDecision::Track),
            "track*" | "track_star" | "trackstar" => Some(SsvcDecision::TrackStar),
            "attend" => Some(SsvcDecision::Attend),
            "act" => Some(SsvcDecision::Act),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SsvcDecision::Track => "TRACK",
            SsvcDecision::TrackStar => "TRACK*",
            SsvcDecision::Attend => "ATTEND",
            SsvcDecision::Act => "ACT",
        }
    }
}

/// Stakeholder-specific decision and the decision points behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsvcRecord {
    pub decision: SsvcDecision,
    pub exploitation: Option<String>,
    pub automatable: Option<String>,
    pub technical_impact: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Immediate,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
            Urgency::Immediate => "IMMEDIATE",
        }
    }
}

/// Narrative enrichment produced by an AI provider for one finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAssessment {
    pub risk_score: f64,
    pub remediation_guidance: Option<String>,
    pub confidence: f64,
}

/// Everything known about one vulnerability identifier
///
/// The `risk_score`, `priority` and `urgency` fields are derived; call
/// [`VulnerabilityScore::refresh`] after changing any signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityScore {
    pub id: String,
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cwe_ids: Vec<String>,
    pub cvss_v2: Option<CvssScore>,
    pub cvss_v30: Option<CvssScore>,
    pub cvss_v31: Option<CvssScore>,
    pub kev: Option<KevRecord>,
    pub epss: Option<EpssRecord>,
    pub ssvc: Option<SsvcRecord>,
    pub risk_score: f64,
    pub priority: Priority,
    pub urgency: Urgency,
    pub ai: Option<AiAssessment>,
}

impl VulnerabilityScore {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            published: None,
            last_modified: None,
            cwe_ids: Vec::new(),
            cvss_v2: None,
            cvss_v30: None,
            cvss_v31: None,
            kev: None,
            epss: None,
            ssvc: None,
            risk_score: 0.0,
            priority: Priority::Low,
            urgency: Urgency::Low,
            ai: None,
        }
    }

    /// Best available CVSS representation: v3.1, then v3.0, then v2
    pub fn best_cvss(&self) -> Option<&CvssScore> {
        self.cvss_v31
            .as_ref()
            .or(self.cvss_v30.as_ref())
            .or(self.cvss_v2.as_ref())
    }

    pub fn base_score(&self) -> Option<f64> {
        self.best_cvss().map(|c| c.base_score)
    }

    pub fn severity(&self) -> Severity {
        self.best_cvss()
            .map(|c| c.severity)
            .unwrap_or(Severity::None)
    }

    pub fn is_known_exploited(&self) -> bool {
        self.kev.as_ref().is_some_and(|k| k.known_exploited)
    }

    pub fn epss_score(&self) -> Option<f64> {
        self.epss.as_ref().map(|e| e.score)
    }

    pub fn ssvc_decision(&self) -> Option<SsvcDecision> {
        self.ssvc.as_ref().map(|s| s.decision)
    }

    /// Recompute the derived risk, priority and urgency fields
    pub fn refresh(&mut self) {
        let outcome = crate::service::scoring::score(self);
        self.risk_score = outcome.risk_score;
        self.priority = outcome.priority;
        self.urgency = outcome.urgency;
    }
}
