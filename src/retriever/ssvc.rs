//! SSVC (Stakeholder-Specific Vulnerability Categorization) decision feed
//!
//! The endpoint is configurable. It is queried with `?cve=<id>` and expected
//! to answer with a `data` array of decision objects.

use reqwest::Client;
use serde::Deserialize;

use super::throttle::Throttle;
use super::{RetrieverError, feed_client};
use crate::model::{FeedConfig, SsvcDecision, SsvcRecord};

#[derive(Debug, Deserialize)]
struct SsvcResponse {
    #[serde(default)]
    data: Vec<SsvcEntry>,
}

#[derive(Debug, Deserialize)]
struct SsvcEntry {
    #[serde(alias = "id")]
    cve: String,
    decision: String,
    exploitation: Option<String>,
    automatable: Option<String>,
    #[serde(alias = "technicalImpact")]
    technical_impact: Option<String>,
}

pub struct SsvcClient {
    client: Client,
    base_url: String,
    throttle: Throttle,
}

impl SsvcClient {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            client: feed_client(config),
            base_url: config.ssvc_base_url.clone(),
            throttle: Throttle::new(std::time::Duration::from_millis(config.ssvc_delay_ms)),
        }
    }

    /// Fetch the decision for a CVE; `None` when the feed has no usable decision
    pub async fn fetch(&self, cve: &str) -> Result<Option<SsvcRecord>, RetrieverError> {
        self.throttle.wait().await;

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("cve", cve)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RetrieverError::ParseError(format!(
                "HTTP {}: {}",
                response.status(),
                cve
            )));
        }

        let body: SsvcResponse = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid SSVC response: {}", e)))?;

        let Some(entry) = body
            .data
            .into_iter()
            .find(|entry| entry.cve.eq_ignore_ascii_case(cve))
        else {
            return Ok(None);
        };

        let Some(decision) = SsvcDecision::parse(&entry.decision) else {
            tracing::debug!(cve = %cve, decision = %entry.decision, "Unrecognized SSVC decision");
            return Ok(None);
        };

        Ok(Some(SsvcRecord {
            decision,
            exploitation: entry.exploitation,
            automatable: entry.automatable,
            technical_impact: entry.technical_impact,
        }))
    }
}
