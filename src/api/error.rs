use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::error::IngestError;

/// JSON body of every failed API request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub code: u16,
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::Auth(_) => StatusCode::UNAUTHORIZED,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            IngestError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            IngestError::Persistence(_) | IngestError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            IngestError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::ExternalService(_) => "external_service",
            IngestError::RateLimited { .. } => "rate_limited",
            IngestError::Validation(_) => "validation",
            IngestError::Persistence(_) => "persistence",
            IngestError::NotFound(_) => "not_found",
            IngestError::Config(_) => "config",
            IngestError::Auth(_) => "unauthorized",
            IngestError::Cancelled => "cancelled",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let body = ErrorResponse {
            error: self.kind(),
            message: self.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

// Extractor rejections are reported as validation errors.
impl From<JsonRejection> for IngestError {
    fn from(rejection: JsonRejection) -> Self {
        IngestError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for IngestError {
    fn from(rejection: PathRejection) -> Self {
        IngestError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for IngestError {
    fn from(rejection: QueryRejection) -> Self {
        IngestError::Validation(rejection.body_text())
    }
}
