//! Operational metrics endpoints

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use super::error::ApiError;
use crate::model::BridgeStatistics;
use crate::service::{AnalysisService, CacheStats, MetricsSnapshot, ScanAggregator};

#[derive(Serialize)]
pub struct MetricsResponse {
    pub analysis: MetricsSnapshot,
    pub response_cache: CacheStats,
    pub scans: BridgeStatistics,
    pub active_scans: usize,
}

/// JSON snapshot of analysis, cache and scan counters
#[get("/v1/metrics")]
pub async fn metrics_json(
    service: web::Data<AnalysisService>,
    aggregator: web::Data<ScanAggregator>,
) -> impl Responder {
    HttpResponse::Ok().json(MetricsResponse {
        analysis: service.metrics().snapshot(),
        response_cache: service.cache().stats(),
        scans: aggregator.statistics(),
        active_scans: aggregator.active_scans(),
    })
}

/// Prometheus text exposition
#[get("/metrics")]
pub async fn metrics_prometheus(
    service: web::Data<AnalysisService>,
) -> Result<HttpResponse, ApiError> {
    let body = service.metrics().to_prometheus().map_err(|e| {
        ApiError::Internal(format!("Failed to encode metrics: {}", e))
    })?;
    Ok(HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(body))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(metrics_json).service(metrics_prometheus);
}
