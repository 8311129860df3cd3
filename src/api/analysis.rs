//! REST API endpoints for AI analysis requests
//!
//! Provider failures are not HTTP errors: the response body carries
//! `success: false` with an error kind and message.

use actix_web::{HttpResponse, post, web};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::model::{AnalysisRequest, AnalysisResponse};
use crate::service::{AnalysisService, WorkerPool};

const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<AnalysisRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub responses: Vec<AnalysisResponse>,
    pub successful: usize,
    pub failed: usize,
}

/// Process one request inline, retrying transient failures
#[post("/v1/analyze")]
pub async fn analyze(
    service: web::Data<AnalysisService>,
    body: web::Json<AnalysisRequest>,
) -> HttpResponse {
    let response = service.process_with_retry(&body).await;
    HttpResponse::Ok().json(response)
}

/// Process one request on the worker pool
///
/// Answers 503 when the queue is full instead of waiting for capacity.
#[post("/v1/analyze/async")]
pub async fn analyze_async(
    pool: web::Data<WorkerPool>,
    body: web::Json<AnalysisRequest>,
) -> Result<HttpResponse, ApiError> {
    let handle = pool.try_submit(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(handle.wait().await))
}

/// Process a batch of independent requests concurrently
#[post("/v1/analyze/batch")]
pub async fn analyze_batch(
    service: web::Data<AnalysisService>,
    body: web::Json<BatchRequest>,
) -> Result<HttpResponse, ApiError> {
    let count = body.requests.len();
    if count == 0 {
        return Err(ApiError::BadRequest("batch must contain at least one request".into()));
    }
    if count > MAX_BATCH_SIZE {
        return Err(ApiError::BadRequest(format!(
            "batch of {} exceeds the limit of {}",
            count, MAX_BATCH_SIZE
        )));
    }

    let responses = service.process_batch(&body.requests).await;
    let successful = responses.iter().filter(|r| r.success).count();

    tracing::info!(count, successful, "Processed analysis batch");

    Ok(HttpResponse::Ok().json(BatchResponse {
        failed: count - successful,
        successful,
        responses,
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(analyze)
        .service(analyze_async)
        .service(analyze_batch);
}
