//! Composite risk scoring
//!
//! Combines CVSS, KEV, EPSS and SSVC signals into a single 0-10 risk score
//! plus a remediation priority and urgency. Signals that are absent are left
//! out of the weighted mean rather than counted as zero.

use crate::model::{Priority, Severity, SsvcDecision, Urgency, VulnerabilityScore};

const WEIGHT_CVSS: f64 = 0.4;
const WEIGHT_KEV: f64 = 0.3;
const WEIGHT_EPSS: f64 = 0.2;
const WEIGHT_SSVC: f64 = 0.1;

const MAX_RISK: f64 = 10.0;

/// EPSS probability above which a high-severity finding is treated as likely exploited
const EPSS_LIKELY_EXPLOITED: f64 = 0.1;

/// Host risk bonuses, on the 0-100 host scale
const HOST_KEV_BONUS: f64 = 15.0;
const HOST_EPSS_FACTOR: f64 = 10.0;
const HOST_SSVC_ACT_BONUS: f64 = 12.0;
const MAX_HOST_RISK: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    pub risk_score: f64,
    pub priority: Priority,
    pub urgency: Urgency,
}

/// Score one vulnerability from whatever signals it carries
pub fn score(vuln: &VulnerabilityScore) -> ScoreOutcome {
    ScoreOutcome {
        risk_score: risk_score(vuln),
        priority: priority(vuln),
        urgency: urgency(vuln),
    }
}

fn ssvc_ordinal(decision: SsvcDecision) -> f64 {
    match decision {
        SsvcDecision::Track => 2.5,
        SsvcDecision::TrackStar => 5.0,
        SsvcDecision::Attend => 7.5,
        SsvcDecision::Act => 10.0,
    }
}

fn risk_score(vuln: &VulnerabilityScore) -> f64 {
    let mut weighted = 0.0;
    let mut weights = 0.0;

    if let Some(base) = vuln.base_score() {
        weighted += base * WEIGHT_CVSS;
        weights += WEIGHT_CVSS;
    }

    if let Some(kev) = &vuln.kev {
        let term = if kev.known_exploited { MAX_RISK } else { 0.0 };
        weighted += term * WEIGHT_KEV;
        weights += WEIGHT_KEV;
    }

    if let Some(epss) = vuln.epss_score() {
        weighted += epss * 10.0 * WEIGHT_EPSS;
        weights += WEIGHT_EPSS;
    }

    if let Some(decision) = vuln.ssvc_decision() {
        weighted += ssvc_ordinal(decision) * WEIGHT_SSVC;
        weights += WEIGHT_SSVC;
    }

    if weights == 0.0 {
        return 0.0;
    }

    (weighted / weights).min(MAX_RISK)
}

fn likely_exploited(vuln: &VulnerabilityScore) -> bool {
    vuln.epss_score().is_some_and(|e| e > EPSS_LIKELY_EXPLOITED)
}

fn priority(vuln: &VulnerabilityScore) -> Priority {
    let severity = vuln.severity();

    if vuln.is_known_exploited() {
        return Priority::Critical;
    }
    if severity >= Severity::High && likely_exploited(vuln) {
        return Priority::Critical;
    }

    match severity {
        Severity::Critical => Priority::High,
        Severity::High => Priority::Medium,
        _ if vuln.ssvc_decision() == Some(SsvcDecision::Act) => Priority::High,
        _ => Priority::Low,
    }
}

fn urgency(vuln: &VulnerabilityScore) -> Urgency {
    if vuln.is_known_exploited() {
        return Urgency::Immediate;
    }

    match vuln.severity() {
        Severity::Critical if likely_exploited(vuln) => Urgency::High,
        Severity::Critical | Severity::High => Urgency::Medium,
        _ => Urgency::Low,
    }
}

/// Contribution of one finding to its host's composite risk
pub fn host_term(vuln: &VulnerabilityScore) -> f64 {
    let mut term = vuln.base_score().unwrap_or(0.0);

    if vuln.is_known_exploited() {
        term += HOST_KEV_BONUS;
    }
    if let Some(epss) = vuln.epss_score() {
        term += epss * HOST_EPSS_FACTOR;
    }
    if vuln.ssvc_decision() == Some(SsvcDecision::Act) {
        term += HOST_SSVC_ACT_BONUS;
    }
    if let Some(ai) = &vuln.ai {
        term += ai.risk_score;
    }

    term
}

/// Mean of the per-finding terms, capped at 100; an empty host scores 0
pub fn host_risk(findings: &[VulnerabilityScore]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }

    let total: f64 = findings.iter().map(host_term).sum();
    (total / findings.len() as f64).min(MAX_HOST_RISK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AiAssessment, CvssScore, CvssVersion, EpssRecord, KevRecord, SsvcRecord,
    };

    fn with_v31(id: &str, base: f64) -> VulnerabilityScore {
        let mut vuln = VulnerabilityScore::new(id);
        vuln.cvss_v31 = Some(CvssScore::new(CvssVersion::V31, base, None));
        vuln
    }

    fn epss(score: f64) -> EpssRecord {
        EpssRecord {
            score,
            percentile: 0.5,
            date: None,
            model_version: None,
        }
    }

    fn ssvc(decision: SsvcDecision) -> SsvcRecord {
        SsvcRecord {
            decision,
            exploitation: None,
            automatable: None,
            technical_impact: None,
        }
    }

    fn kev_listed() -> KevRecord {
        KevRecord {
            known_exploited: true,
            ..KevRecord::not_listed()
        }
    }

    #[test]
    fn test_critical_cvss_only() {
        let outcome = score(&with_v31("CVE-2021-44228", 9.8));
        assert_eq!(outcome.priority, Priority::High);
        assert_eq!(outcome.urgency, Urgency::Medium);
        assert!((outcome.risk_score - 9.8).abs() < 1e-9);
    }

    #[test]
    fn test_known_exploited_overrides() {
        let mut vuln = with_v31("CVE-2023-0001", 7.2);
        vuln.kev = Some(kev_listed());
        let outcome = score(&vuln);
        assert_eq!(outcome.priority, Priority::Critical);
        assert_eq!(outcome.urgency, Urgency::Immediate);

        vuln.epss = Some(epss(0.01));
        vuln.ssvc = Some(ssvc(SsvcDecision::Track));
        let outcome = score(&vuln);
        assert_eq!(outcome.priority, Priority::Critical);
        assert_eq!(outcome.urgency, Urgency::Immediate);
    }

    #[test]
    fn test_absent_signal_is_not_zero() {
        let without_kev = with_v31("CVE-2023-0002", 8.0);
        let mut with_unlisted_kev = without_kev.clone();
        with_unlisted_kev.kev = Some(KevRecord::not_listed());

        let absent = score(&without_kev).risk_score;
        let unlisted = score(&with_unlisted_kev).risk_score;
        assert!((absent - 8.0).abs() < 1e-9);
        assert!((unlisted - 8.0 * 0.4 / 0.7).abs() < 1e-9);
        assert!(unlisted < absent);
    }

    #[test]
    fn test_no_signals_scores_zero() {
        let outcome = score(&VulnerabilityScore::new("CVE-2023-0003"));
        assert_eq!(outcome.risk_score, 0.0);
        assert_eq!(outcome.priority, Priority::Low);
        assert_eq!(outcome.urgency, Urgency::Low);
    }

    #[test]
    fn test_all_signals_weighted_mean() {
        let mut vuln = with_v31("CVE-2023-0004", 9.0);
        vuln.kev = Some(kev_listed());
        vuln.epss = Some(epss(0.5));
        vuln.ssvc = Some(ssvc(SsvcDecision::Attend));

        let expected = 9.0 * 0.4 + 10.0 * 0.3 + 5.0 * 0.2 + 7.5 * 0.1;
        assert!((score(&vuln).risk_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_high_severity_with_likely_exploitation() {
        let mut vuln = with_v31("CVE-2023-0005", 8.1);
        vuln.epss = Some(epss(0.35));
        let outcome = score(&vuln);
        assert_eq!(outcome.priority, Priority::Critical);
        assert_eq!(outcome.urgency, Urgency::Medium);

        let mut critical = with_v31("CVE-2023-0006", 9.1);
        critical.epss = Some(epss(0.35));
        assert_eq!(score(&critical).urgency, Urgency::High);
    }

    #[test]
    fn test_ssvc_act_raises_low_severity() {
        let mut vuln = with_v31("CVE-2023-0007", 5.0);
        assert_eq!(score(&vuln).priority, Priority::Low);
        vuln.ssvc = Some(ssvc(SsvcDecision::Act));
        assert_eq!(score(&vuln).priority, Priority::High);
    }

    #[test]
    fn test_high_severity_rule_precedes_ssvc_act() {
        let mut vuln = with_v31("CVE-2023-0009", 7.5);
        vuln.ssvc = Some(ssvc(SsvcDecision::Act));
        assert_eq!(score(&vuln).priority, Priority::Medium);

        let mut critical = with_v31("CVE-2023-0010", 9.5);
        critical.ssvc = Some(ssvc(SsvcDecision::Act));
        assert_eq!(score(&critical).priority, Priority::High);
    }

    #[test]
    fn test_zero_epss_differs_from_absent_epss() {
        let without_epss = with_v31("CVE-2023-0011", 8.0);
        let mut zero_epss = without_epss.clone();
        zero_epss.epss = Some(epss(0.0));

        let absent = score(&without_epss).risk_score;
        let zero = score(&zero_epss).risk_score;
        assert!((absent - 8.0).abs() < 1e-9);
        assert!((zero - 8.0 * 0.4 / 0.6).abs() < 1e-9);
        assert!(zero < absent);
    }

    #[test]
    fn test_best_cvss_version_wins() {
        let mut vuln = VulnerabilityScore::new("CVE-2019-0001");
        vuln.cvss_v2 = Some(CvssScore::new(CvssVersion::V2, 5.0, None));
        assert!((score(&vuln).risk_score - 5.0).abs() < 1e-9);
        vuln.cvss_v30 = Some(CvssScore::new(CvssVersion::V30, 7.5, None));
        assert!((score(&vuln).risk_score - 7.5).abs() < 1e-9);
        vuln.cvss_v31 = Some(CvssScore::new(CvssVersion::V31, 9.1, None));
        assert!((score(&vuln).risk_score - 9.1).abs() < 1e-9);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let mut vuln = with_v31("CVE-2023-0008", 6.4);
        vuln.epss = Some(epss(0.07));
        assert_eq!(score(&vuln), score(&vuln));
    }

    #[test]
    fn test_host_risk_mean_of_cvss() {
        let findings = vec![
            with_v31("CVE-2023-1000", 9.8),
            with_v31("CVE-2023-1001", 7.0),
            with_v31("CVE-2023-1002", 3.0),
        ];
        assert!((host_risk(&findings) - 6.6).abs() < 1e-9);
        assert_eq!(host_risk(&[]), 0.0);
    }

    #[test]
    fn test_host_risk_bonuses_and_cap() {
        let mut vuln = with_v31("CVE-2023-1003", 9.0);
        vuln.kev = Some(kev_listed());
        vuln.epss = Some(epss(0.9));
        vuln.ssvc = Some(ssvc(SsvcDecision::Act));
        vuln.refresh();
        assert!((host_term(&vuln) - (9.0 + 15.0 + 9.0 + 12.0)).abs() < 1e-9);

        vuln.ai = Some(AiAssessment {
            risk_score: 4.0,
            remediation_guidance: None,
            confidence: 0.8,
        });
        assert!((host_term(&vuln) - 49.0).abs() < 1e-9);

        let many = vec![vuln; 3];
        assert!(host_risk(&many) <= 100.0);
    }
}
