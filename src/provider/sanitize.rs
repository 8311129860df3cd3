//! Redaction of addresses from outbound prompts

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::model::AnalysisRequest;

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b")
        .expect("IPv4 pattern is valid")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("e-mail pattern is valid")
});

pub const REDACTED_IP: &str = "[REDACTED_IP]";
pub const REDACTED_EMAIL: &str = "[REDACTED_EMAIL]";

/// Replace IPv4 and e-mail addresses with fixed placeholders
pub fn sanitize(text: &str) -> String {
    let text = EMAIL.replace_all(text, REDACTED_EMAIL);
    IPV4.replace_all(&text, REDACTED_IP).into_owned()
}

/// Apply [`sanitize`] to every string inside a JSON value
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Copy of the request with its payload and context redacted
pub fn sanitize_request(request: &AnalysisRequest) -> AnalysisRequest {
    AnalysisRequest {
        task: request.task,
        input: sanitize_value(&request.input),
        context: request.context.as_deref().map(sanitize),
        provider: request.provider,
    }
}
