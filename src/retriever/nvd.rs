//! NVD (National Vulnerability Database) CVE API 2.0 client

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::throttle::Throttle;
use super::{RetrieverError, feed_client};
use crate::model::{CvssScore, CvssVersion, FeedConfig, VulnerabilityScore};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdResponse {
    #[serde(default)]
    vulnerabilities: Vec<NvdVulnerability>,
}

#[derive(Debug, Deserialize)]
struct NvdVulnerability {
    cve: NvdCve,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCve {
    id: String,
    published: Option<String>,
    last_modified: Option<String>,
    #[serde(default)]
    descriptions: Vec<LangString>,
    #[serde(default)]
    metrics: NvdMetrics,
    #[serde(default)]
    weaknesses: Vec<NvdWeakness>,
}

#[derive(Debug, Deserialize)]
struct LangString {
    lang: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct NvdMetrics {
    #[serde(rename = "cvssMetricV31", default)]
    v31: Vec<CvssMetric>,
    #[serde(rename = "cvssMetricV30", default)]
    v30: Vec<CvssMetric>,
    #[serde(rename = "cvssMetricV2", default)]
    v2: Vec<CvssMetric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CvssMetric {
    cvss_data: CvssData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CvssData {
    base_score: f64,
    vector_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NvdWeakness {
    #[serde(default)]
    description: Vec<LangString>,
}

/// Client for the NVD CVE API
pub struct NvdClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    throttle: Throttle,
}

impl NvdClient {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            client: feed_client(config),
            base_url: config.nvd_base_url.clone(),
            api_key: config.nvd_api_key.clone(),
            throttle: Throttle::new(config.effective_nvd_delay()),
        }
    }

    /// Fetch description, dates, weaknesses and CVSS metrics for one CVE
    pub async fn fetch(&self, cve: &str) -> Result<VulnerabilityScore, RetrieverError> {
        self.throttle.wait().await;

        tracing::debug!(cve = %cve, "Fetching CVE from NVD");

        let mut request = self.client.get(&self.base_url).query(&[("cveId", cve)]);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RetrieverError::NotFound(cve.to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            tracing::warn!(cve = %cve, status = response.status().as_u16(), "NVD rate limited");
            return Err(RetrieverError::RateLimited);
        }

        if !response.status().is_success() {
            return Err(RetrieverError::ParseError(format!(
                "HTTP {}: {}",
                response.status(),
                cve
            )));
        }

        let body: NvdResponse = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid NVD response: {}", e)))?;

        let cve_record = body
            .vulnerabilities
            .into_iter()
            .map(|v| v.cve)
            .find(|c| c.id.eq_ignore_ascii_case(cve))
            .ok_or_else(|| RetrieverError::NotFound(cve.to_string()))?;

        Ok(into_score(cve_record))
    }
}

fn into_score(cve: NvdCve) -> VulnerabilityScore {
    let mut score = VulnerabilityScore::new(cve.id);

    score.description = cve
        .descriptions
        .iter()
        .find(|d| d.lang == "en")
        .or(cve.descriptions.first())
        .map(|d| d.value.clone());
    score.published = cve.published.as_deref().and_then(parse_timestamp);
    score.last_modified = cve.last_modified.as_deref().and_then(parse_timestamp);

    let mut cwe_ids: Vec<String> = cve
        .weaknesses
        .into_iter()
        .flat_map(|w| w.description)
        .map(|d| d.value)
        .filter(|v| v.starts_with("CWE-"))
        .collect();
    cwe_ids.sort();
    cwe_ids.dedup();
    score.cwe_ids = cwe_ids;

    let first = |metrics: Vec<CvssMetric>, version: CvssVersion| {
        metrics
            .into_iter()
            .next()
            .map(|m| CvssScore::new(version, m.cvss_data.base_score, m.cvss_data.vector_string))
    };
    score.cvss_v31 = first(cve.metrics.v31, CvssVersion::V31);
    score.cvss_v30 = first(cve.metrics.v30, CvssVersion::V30);
    score.cvss_v2 = first(cve.metrics.v2, CvssVersion::V2);

    score
}

/// NVD timestamps carry no zone and are UTC
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    value
        .parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .or_else(|_| value.parse::<DateTime<Utc>>())
        .ok()
}
