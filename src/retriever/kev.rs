//! CISA Known Exploited Vulnerabilities catalog client
//!
//! The catalog is published as a single JSON document. It is downloaded whole,
//! indexed by CVE and kept for the configured lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{RetrieverError, feed_client};
use crate::model::{FeedConfig, KevRecord};

#[derive(Debug, Deserialize)]
struct KevCatalog {
    #[serde(default)]
    vulnerabilities: Vec<KevEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KevEntry {
    #[serde(rename = "cveID")]
    cve_id: String,
    date_added: Option<String>,
    due_date: Option<String>,
    required_action: Option<String>,
    known_ransomware_campaign_use: Option<String>,
    notes: Option<String>,
}

impl From<KevEntry> for KevRecord {
    fn from(entry: KevEntry) -> Self {
        KevRecord {
            known_exploited: true,
            date_added: entry.date_added.as_deref().and_then(parse_date),
            due_date: entry.due_date.as_deref().and_then(parse_date),
            required_action: entry.required_action,
            known_ransomware_use: entry.known_ransomware_campaign_use,
            notes: entry.notes.filter(|n| !n.trim().is_empty()),
        }
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

struct Snapshot {
    fetched_at: Instant,
    entries: Arc<HashMap<String, KevRecord>>,
}

pub struct KevClient {
    client: Client,
    url: String,
    ttl: Duration,
    catalog: Mutex<Option<Snapshot>>,
}

impl KevClient {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            client: feed_client(config),
            url: config.kev_url.clone(),
            ttl: Duration::from_secs(config.kev_catalog_ttl_secs),
            catalog: Mutex::new(None),
        }
    }

    /// Look up a CVE; an unlisted CVE yields a record with `known_exploited == false`
    pub async fn lookup(&self, cve: &str) -> Result<KevRecord, RetrieverError> {
        let catalog = self.catalog().await?;
        Ok(catalog
            .get(&cve.to_ascii_uppercase())
            .cloned()
            .unwrap_or_else(KevRecord::not_listed))
    }

    /// Current catalog, downloading it when missing or stale
    ///
    /// Concurrent callers wait for a single download.
    async fn catalog(&self) -> Result<Arc<HashMap<String, KevRecord>>, RetrieverError> {
        let mut slot = self.catalog.lock().await;

        if let Some(snapshot) = slot.as_ref() {
            if snapshot.fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&snapshot.entries));
            }
        }

        match self.download().await {
            Ok(entries) => {
                let entries = Arc::new(entries);
                *slot = Some(Snapshot {
                    fetched_at: Instant::now(),
                    entries: Arc::clone(&entries),
                });
                Ok(entries)
            }
            Err(e) => match slot.as_ref() {
                Some(stale) => {
                    tracing::warn!(error = %e, "KEV catalog refresh failed, using stale copy");
                    Ok(Arc::clone(&stale.entries))
                }
                None => Err(e),
            },
        }
    }

    async fn download(&self) -> Result<HashMap<String, KevRecord>, RetrieverError> {
        let start = std::time::Instant::now();

        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(RetrieverError::ParseError(format!(
                "HTTP {}: {}",
                response.status(),
                self.url
            )));
        }

        let catalog: KevCatalog = response
            .json()
            .await
            .map_err(|e| RetrieverError::ParseError(format!("Invalid KEV catalog: {}", e)))?;

        let entries: HashMap<String, KevRecord> = catalog
            .vulnerabilities
            .into_iter()
            .map(|entry| (entry.cve_id.to_ascii_uppercase(), KevRecord::from(entry)))
            .collect();

        tracing::info!(
            entries = entries.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Downloaded KEV catalog"
        );

        Ok(entries)
    }
}
