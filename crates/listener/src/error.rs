use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reconcile::{QueueError, SettingsError};
use serde::{Deserialize, Serialize};

/// JSON body returned with every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failures surfaced to webhook callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The `Authorization` header did not match the configured token, or
    /// either was missing.
    #[error("access denied")]
    AccessDenied,

    /// The expected token could not be read.
    #[error("access denied")]
    Settings(#[source] SettingsError),

    /// The work queue rejected the request; the caller may retry.
    #[error("work queue unavailable")]
    Queue(#[source] QueueError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AccessDenied | ApiError::Settings(_) => StatusCode::FORBIDDEN,
            ApiError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        match &self {
            ApiError::AccessDenied => {}
            ApiError::Settings(source) => {
                tracing::error!(error = %source, "webhook token could not be read");
            }
            ApiError::Queue(source) => {
                tracing::error!(error = %source, "work queue request failed");
            }
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}
