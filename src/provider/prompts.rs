//! Prompt construction for analysis tasks

use serde_json::Value;

use crate::model::{AnalysisRequest, TaskKind};

pub const VULNERABILITY_ANALYSIS_SYSTEM_PROMPT: &str = "You are a vulnerability analyst. \
Assess the exploitability and business impact of the finding described in the input, \
then give concrete remediation guidance. Be concise and factual.";

pub const THREAT_MODELING_SYSTEM_PROMPT: &str = "You are a threat modeling expert. \
Identify likely attack paths, threat actors and mitigations for the target described in the input.";

pub const SCAN_OPTIMIZATION_SYSTEM_PROMPT: &str = "You are a network scanning specialist. \
Recommend scan settings and check selection for the target described in the input.";

pub const REPORT_GENERATION_SYSTEM_PROMPT: &str = "You are a security report writer. \
Produce an executive summary of the findings in the input for a non-technical audience.";

pub const EXPLOIT_SUGGESTION_SYSTEM_PROMPT: &str = "You are assisting an authorized penetration test. \
Describe, at a high level, how the finding in the input could be validated safely.";

pub fn system_prompt(task: TaskKind) -> &'static str {
    match task {
        TaskKind::VulnerabilityAnalysis => VULNERABILITY_ANALYSIS_SYSTEM_PROMPT,
        TaskKind::ThreatModeling => THREAT_MODELING_SYSTEM_PROMPT,
        TaskKind::ScanOptimization => SCAN_OPTIMIZATION_SYSTEM_PROMPT,
        TaskKind::ReportGeneration => REPORT_GENERATION_SYSTEM_PROMPT,
        TaskKind::ExploitSuggestion => EXPLOIT_SUGGESTION_SYSTEM_PROMPT,
    }
}

/// Build the user message from the request payload and optional context
pub fn build_user_prompt(request: &AnalysisRequest) -> String {
    let input = match &request.input {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };

    match request.context.as_deref() {
        Some(context) if !context.trim().is_empty() => {
            format!("## Input\n\n{}\n\n## Context\n\n{}", input, context)
        }
        _ => format!("## Input\n\n{}", input),
    }
}
