//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beaconscan_core::BeaconError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - Bluetooth stack or coordinator unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "COORDINATOR_SHUT_DOWN",
    "message": "Scan coordinator has shut down",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "REGION_NOT_FOUND").
    #[schema(example = "COORDINATOR_SHUT_DOWN")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Scan coordinator has shut down")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// A region lookup that matched nothing.
    pub fn region_not_found(identifier: &str) -> Self {
        Self::NotFound {
            error_code: "REGION_NOT_FOUND".to_string(),
            message: format!("No region named '{identifier}'"),
        }
    }

    const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            Self::NotFound {
                error_code,
                message,
            } => ErrorResponse {
                error: error_code,
                message,
                details: None,
            },

            Self::InternalError {
                error_code,
                message,
            } => {
                tracing::error!(error_code = %error_code, message = %message, "Internal server error");
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                }
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details: details.map(serde_json::Value::String),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from beaconscan_core errors.
impl From<BeaconError> for ApiError {
    fn from(err: BeaconError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();

        match err.http_status_code() {
            503 => Self::ServiceUnavailable {
                error_code,
                message,
                details: err
                    .is_recoverable()
                    .then(|| "The condition may clear without intervention".to_string()),
            },
            _ => Self::InternalError {
                error_code,
                message,
            },
        }
    }
}
