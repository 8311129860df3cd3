//! FIRST EPSS (Exploit Prediction Scoring System) client

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Deserializer};

use super::throttle::Throttle;
use super::{RetrieverError, feed_client};
use crate::model::{EpssRecord, FeedConfig};

#[derive(Debug, Deserialize)]
struct EpssResponse {
    model_version: Option<String>,
    #[serde(default)]
    data: Vec<EpssEntry>,
}

#[derive(Debug, Deserialize)]
struct EpssEntry {
    cve: String,
    #[serde(deserialize_with = "number_or_string")]
    epss: f64,
    #[serde(deserialize_with = "number_or_string")]
    percentile: f64,
    date: Option<String>,
}

/// The API serializes probabilities as strings
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub struct EpssClient {
    client: Client,
    base_url: String,
    throttle: Throttle,
}

impl EpssClient {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            client: feed_client(config),
            base_url: config.epss_base_url.clone(),
            throttle: Throttle::new(std::time::Duration::from_millis(config.epss_delay_ms)),
        }
    }

    /// Fetch the current EPSS probability; `None` when the CVE is not scored
    pub async fn fetch(&self, cve: &str) -> Result<Option<EpssRecord>, RetrieverError> {
        self.throttle.wait().await;

        tracing::debug!(cve = %cve, "Fetching EPSS score");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("cve", cve)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RetrieverError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(RetrieverError::ParseError(format!(
                "HTTP {}: {}",
                response.status(),
                cve
            )));
        }

        let body: EpssResponse = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid EPSS response: {}", e)))?;

        let model_version = body.model_version;
        Ok(body
            .data
            .into_iter()
            .find(|entry| entry.cve.eq_ignore_ascii_case(cve))
            .map(|entry| EpssRecord {
                score: entry.epss.clamp(0.0, 1.0),
                percentile: entry.percentile.clamp(0.0, 1.0),
                date: entry
                    .date
                    .as_deref()
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
                model_version,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> FeedConfig {
        FeedConfig {
            epss_base_url: format!("{}/data/v1/epss", server.uri()),
            epss_delay_ms: 0,
            ..FeedConfig::default()
        }
    }

    #[tokio::test]
    async fn test_string_encoded_scores() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("cve", "CVE-2021-44228"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "OK",
                "model_version": "v2023.03.01",
                "data": [{
                    "cve": "CVE-2021-44228",
                    "epss": "0.944780000",
                    "percentile": "0.999990000",
                    "date": "2024-05-01"
                }]
            })))
            .mount(&server)
            .await;

        let record = EpssClient::new(&config(&server))
            .fetch("CVE-2021-44228")
            .await
            .unwrap()
            .unwrap();

        assert!((record.score - 0.94478).abs() < 1e-9);
        assert!((record.percentile - 0.99999).abs() < 1e-9);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(record.model_version.as_deref(), Some("v2023.03.01"));
    }

    #[tokio::test]
    async fn test_unscored_cve() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "OK", "data": []})))
            .mount(&server)
            .await;

        let record = EpssClient::new(&config(&server)).fetch("CVE-2099-0001").await.unwrap();
        assert!(record.is_none());
    }
}
