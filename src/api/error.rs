//! Unified API error handling
//!
//! This module provides a consistent error response format across all API endpoints.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use uuid::Uuid;

use crate::retriever::RetrieverError;
use crate::service::{ScanError, SubmitError};

/// Standard error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type/code
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Unique request ID for tracing
    pub request_id: String,
}

/// Unified API error type
///
/// All API endpoints should return `Result<T, ApiError>` for consistent error handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Vulnerability not found (404)
    #[error("Vulnerability not found: {0}")]
    VulnerabilityNotFound(String),

    /// Bad request / validation error (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflicting state, e.g. a scan that already exists (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request cannot be taken right now (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// External service error (502)
    #[error("External service error: {0}")]
    ExternalService(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::VulnerabilityNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_type = match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::VulnerabilityNotFound(_) => "vulnerability_not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "conflict",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
            ApiError::ExternalService(_) => "external_service_error",
        };

        if status.is_server_error() {
            tracing::error!(
                error_type = error_type,
                status = status.as_u16(),
                message = %self,
                "API error"
            );
        } else {
            tracing::debug!(
                error_type = error_type,
                status = status.as_u16(),
                message = %self,
                "API error"
            );
        }

        HttpResponse::build(status).json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            request_id: Uuid::new_v4().to_string(),
        })
    }
}

// ============================================================================
// From conversions for service errors
// ============================================================================

impl From<RetrieverError> for ApiError {
    fn from(err: RetrieverError) -> Self {
        match err {
            RetrieverError::NotFound(id) => ApiError::VulnerabilityNotFound(id),
            RetrieverError::InvalidIdentifier(_) => ApiError::BadRequest(err.to_string()),
            RetrieverError::RateLimited => ApiError::ServiceUnavailable(err.to_string()),
            RetrieverError::HttpError(_) | RetrieverError::ParseError(_) => {
                ApiError::ExternalService(err.to_string())
            }
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::UnknownScan(id) => ApiError::NotFound(format!("scan {}", id)),
            ScanError::AlreadyActive(_) | ScanError::Ended(_) => ApiError::Conflict(err.to_string()),
            ScanError::Signal(e) => e.into(),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        ApiError::ServiceUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(ScanError::UnknownScan("s".into())), StatusCode::NOT_FOUND),
            (ApiError::from(ScanError::AlreadyActive("s".into())), StatusCode::CONFLICT),
            (ApiError::from(ScanError::Ended("s".into())), StatusCode::CONFLICT),
            (
                ApiError::from(ScanError::Signal(RetrieverError::InvalidIdentifier("x".into()))),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(RetrieverError::ParseError("HTTP 500".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (ApiError::from(SubmitError::QueueFull), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{}", err);
        }
    }
}
