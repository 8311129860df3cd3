//! REST API endpoints for the scanner bridge
//!
//! A scanner starts a scan, reports each finding as it is detected and
//! receives the enrichment back, then ends the scan to obtain the report.

use actix_web::{HttpResponse, delete, get, post, web};
use serde::Deserialize;

use super::error::ApiError;
use crate::model::FindingEvent;
use crate::service::ScanAggregator;

#[derive(Debug, Default, Deserialize)]
pub struct StartScanRequest {
    /// Override the configured AI enrichment default for this scan
    pub ai_enhancement: Option<bool>,
}

/// Start tracking a scan
#[post("/v1/scans/{scan_id}")]
pub async fn start_scan(
    aggregator: web::Data<ScanAggregator>,
    path: web::Path<String>,
    body: Option<web::Json<StartScanRequest>>,
) -> Result<HttpResponse, ApiError> {
    let scan_id = path.into_inner();
    let ai_enhancement = body.and_then(|b| b.ai_enhancement);
    let status = aggregator.start_scan(&scan_id, ai_enhancement)?;
    Ok(HttpResponse::Created().json(status))
}

#[get("/v1/scans/{scan_id}")]
pub async fn scan_status(
    aggregator: web::Data<ScanAggregator>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let scan_id = path.into_inner();
    let status = aggregator
        .status(&scan_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("scan {}", scan_id)))?;
    Ok(HttpResponse::Ok().json(status))
}

/// Report a finding and receive its enrichment
#[post("/v1/scans/{scan_id}/findings")]
pub async fn finding_detected(
    aggregator: web::Data<ScanAggregator>,
    path: web::Path<String>,
    body: web::Json<FindingEvent>,
) -> Result<HttpResponse, ApiError> {
    let scan_id = path.into_inner();
    let enrichment = aggregator.finding_detected(&scan_id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(enrichment))
}

/// End a scan and return its final report
#[delete("/v1/scans/{scan_id}")]
pub async fn end_scan(
    aggregator: web::Data<ScanAggregator>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let scan_id = path.into_inner();
    let report = aggregator
        .end_scan(&scan_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("scan {}", scan_id)))?;
    Ok(HttpResponse::Ok().json(report))
}

/// Composite score for one identifier, independent of any scan
#[get("/v1/vulnerabilities/{id}/score")]
pub async fn vulnerability_score(
    aggregator: web::Data<ScanAggregator>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let score = aggregator.score(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(score))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(start_scan)
        .service(scan_status)
        .service(finding_detected)
        .service(end_scan)
        .service(vulnerability_score);
}
