//! Health check endpoints for Kubernetes liveness and readiness probes

use std::collections::BTreeMap;

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::model::ProviderKind;
use crate::service::AnalysisService;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadinessStatus {
    pub status: String,
    pub version: String,
    pub providers: BTreeMap<ProviderKind, bool>,
}

/// Liveness probe endpoint
///
/// Always returns 200 OK if the service is running.
#[get("/health/live")]
pub async fn liveness() -> impl Responder {
    HttpResponse::Ok().json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe endpoint
///
/// Ready when the analysis service is initialized. Provider availability is
/// reported but does not gate readiness: scoring works without any provider.
#[get("/health/ready")]
pub async fn readiness(service: web::Data<AnalysisService>) -> impl Responder {
    let providers: BTreeMap<ProviderKind, bool> = ProviderKind::ALL
        .into_iter()
        .map(|provider| (provider, service.is_available(provider)))
        .collect();

    let ready = service.is_initialized();
    if !ready {
        tracing::warn!("Readiness check failed: analysis service not initialized");
    }

    let status = ReadinessStatus {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers,
    };

    if ready {
        HttpResponse::Ok().json(status)
    } else {
        HttpResponse::ServiceUnavailable().json(status)
    }
}

/// Configure health check routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(liveness).service(readiness);
}
