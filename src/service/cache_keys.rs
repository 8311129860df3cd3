//! Utilities for generating cache keys for analysis requests

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::{AnalysisRequest, ProviderKind};

/// Generate the fingerprint identifying an analysis request
///
/// The key is based on:
/// - task kind
/// - provider
/// - canonical JSON of the input payload (object keys sorted)
/// - optional context
///
/// Semantically equal payloads therefore map to the same key regardless of
/// key order.
pub fn fingerprint(request: &AnalysisRequest, provider: ProviderKind) -> String {
    // "-" marks a missing context so it never collides with an empty one
    let context = match request.context.as_deref() {
        Some(context) => format!("+{}", context),
        None => "-".to_string(),
    };
    let key_components = format!(
        "{}|{}|{}|{}",
        request.task.as_str(),
        provider.as_str(),
        canonical_json(&request.input),
        context
    );

    hash_string(&key_components)
}

/// Serialize a JSON value with object keys in sorted order
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Hash a string to a hex string using SHA256
pub fn hash_string(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskKind;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = AnalysisRequest::new(
            TaskKind::VulnerabilityAnalysis,
            json!({"cve": "CVE-2021-44228", "host": {"ip": "10.0.0.1", "port": 443}}),
        );
        let b = AnalysisRequest::new(
            TaskKind::VulnerabilityAnalysis,
            json!({"host": {"port": 443, "ip": "10.0.0.1"}, "cve": "CVE-2021-44228"}),
        );
        assert_eq!(
            fingerprint(&a, ProviderKind::OpenAi),
            fingerprint(&b, ProviderKind::OpenAi)
        );
    }

    #[test]
    fn test_distinguishing_fields_change_key() {
        let base = AnalysisRequest::new(TaskKind::VulnerabilityAnalysis, json!({"cve": "CVE-1"}));
        let key = fingerprint(&base, ProviderKind::OpenAi);

        assert_ne!(key, fingerprint(&base, ProviderKind::Claude));

        let other_task = AnalysisRequest::new(TaskKind::ThreatModeling, json!({"cve": "CVE-1"}));
        assert_ne!(key, fingerprint(&other_task, ProviderKind::OpenAi));

        let with_context = base.clone().with_context("internet facing");
        assert_ne!(key, fingerprint(&with_context, ProviderKind::OpenAi));
    }

    #[test]
    fn test_missing_context_differs_from_empty_context() {
        let base = AnalysisRequest::new(TaskKind::VulnerabilityAnalysis, json!({"cve": "CVE-1"}));
        let empty = base.clone().with_context("");
        assert_ne!(
            fingerprint(&base, ProviderKind::OpenAi),
            fingerprint(&empty, ProviderKind::OpenAi)
        );
    }

    #[test]
    fn test_canonical_json_arrays_keep_order() {
        assert_eq!(canonical_json(&json!([3, 1, {"b": 1, "a": "x"}])), r#"[3,1,{"a":"x","b":1}]"#);
    }
}
