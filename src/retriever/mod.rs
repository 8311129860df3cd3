//! External signal retrievers for vulnerability scoring
//!
//! NVD supplies the primary record (description, dates, CVSS). KEV, EPSS and
//! SSVC are secondary signals: when one of them fails the score is still
//! produced with that signal absent.

mod epss;
mod kev;
mod nvd;
mod ssvc;
mod throttle;

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use crate::model::{FeedConfig, VulnerabilityScore};

pub use epss::EpssClient;
pub use kev::KevClient;
pub use nvd::NvdClient;
pub use ssvc::SsvcClient;
pub use throttle::Throttle;

static CVE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CVE-\d{4}-\d{4,}$").expect("CVE pattern is valid"));

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid vulnerability identifier: {0}")]
    InvalidIdentifier(String),
}

/// Normalize and validate a `CVE-YYYY-NNNN` identifier
pub fn normalize_identifier(id: &str) -> Result<String, RetrieverError> {
    let normalized = id.trim().to_ascii_uppercase();
    if CVE_PATTERN.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(RetrieverError::InvalidIdentifier(id.to_string()))
    }
}

fn feed_client(config: &FeedConfig) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(concat!("risk-intel-engine/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Trait for sources producing a scored vulnerability record
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Gather all signals for an identifier and compute its composite score
    async fn fetch(&self, id: &str) -> Result<VulnerabilityScore, RetrieverError>;
}

/// Signal source backed by the public NVD, KEV, EPSS and SSVC feeds
pub struct SignalFetcher {
    nvd: NvdClient,
    kev: KevClient,
    epss: EpssClient,
    ssvc: Option<SsvcClient>,
}

impl SignalFetcher {
    pub fn new(config: &FeedConfig) -> Self {
        let ssvc = (!config.ssvc_base_url.trim().is_empty()).then(|| SsvcClient::new(config));

        tracing::info!(
            nvd = %config.nvd_base_url,
            nvd_keyed = config.nvd_api_key.is_some(),
            ssvc_enabled = ssvc.is_some(),
            "Signal feeds configured"
        );

        Self {
            nvd: NvdClient::new(config),
            kev: KevClient::new(config),
            epss: EpssClient::new(config),
            ssvc,
        }
    }
}

#[async_trait]
impl SignalSource for SignalFetcher {
    async fn fetch(&self, id: &str) -> Result<VulnerabilityScore, RetrieverError> {
        let cve = normalize_identifier(id)?;
        let start = Instant::now();

        let mut score = self.nvd.fetch(&cve).await?;

        let ssvc = async {
            match &self.ssvc {
                Some(client) => client.fetch(&cve).await,
                None => Ok(None),
            }
        };
        let (kev, epss, ssvc) = tokio::join!(self.kev.lookup(&cve), self.epss.fetch(&cve), ssvc);

        score.kev = kev
            .inspect_err(|e| tracing::warn!(cve = %cve, error = %e, "KEV lookup failed"))
            .ok();
        score.epss = epss
            .inspect_err(|e| tracing::warn!(cve = %cve, error = %e, "EPSS fetch failed"))
            .ok()
            .flatten();
        score.ssvc = ssvc
            .inspect_err(|e| tracing::warn!(cve = %cve, error = %e, "SSVC fetch failed"))
            .ok()
            .flatten();

        score.refresh();

        tracing::debug!(
            cve = %cve,
            risk_score = score.risk_score,
            priority = score.priority.as_str(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Computed vulnerability score"
        );

        Ok(score)
    }
}
