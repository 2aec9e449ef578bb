//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hypnos_core::HypnosError;
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
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - The link is in the wrong state for the command.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Link state at the time of the request.
        state: Option<String>,
    },

    /// 422 Unprocessable Entity - Well-formed but semantically invalid.
    Unprocessable {
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
        /// Optional details (not exposed to client in production).
        details: Option<String>,
    },

    /// 502 Bad Gateway - The peripheral failed or refused the operation.
    BadGateway {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Whether issuing the command again may succeed.
        recoverable: bool,
    },

    /// 503 Service Unavailable - Bluetooth or the engine is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "already_active",
    "message": "A connection is already active (state: ready). Disconnect first.",
    "details": {"state": "ready"}
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "invalid_address").
    #[schema(example = "already_active")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "A connection is already active (state: ready). Disconnect first.")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    fn plain(error: String, message: String) -> Self {
        Self {
            error,
            message,
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest {
                error_code,
                message,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::plain(error_code, message),
            ),

            Self::NotFound {
                error_code,
                message,
            } => (
                StatusCode::NOT_FOUND,
                ErrorResponse::plain(error_code, message),
            ),

            Self::Conflict {
                error_code,
                message,
                state,
            } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: state.map(|state| serde_json::json!({ "state": state })),
                },
            ),

            Self::Unprocessable {
                error_code,
                message,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::plain(error_code, message),
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::BadGateway {
                error_code,
                message,
                recoverable,
            } => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: Some(serde_json::json!({ "recoverable": recoverable })),
                },
            ),

            Self::ServiceUnavailable {
                error_code,
                message,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::plain(error_code, message),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::Unprocessable { message, .. } => write!(f, "Unprocessable: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::BadGateway { message, .. } => write!(f, "Bad Gateway: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from hypnos_core errors using their own status mapping.
impl From<HypnosError> for ApiError {
    fn from(err: HypnosError) -> Self {
        let error_code = err.error_code().to_lowercase();
        let message = err.to_string();

        match err.http_status_code() {
            400 => Self::BadRequest {
                error_code,
                message,
            },
            404 => Self::NotFound {
                error_code,
                message,
            },
            409 => {
                let state = match &err {
                    HypnosError::AlreadyActive { state } | HypnosError::NotReady { state } => {
                        Some(state.to_string())
                    }
                    _ => None,
                };
                Self::Conflict {
                    error_code,
                    message,
                    state,
                }
            }
            422 => Self::Unprocessable {
                error_code,
                message,
            },
            502 => Self::BadGateway {
                error_code,
                message,
                recoverable: err.is_recoverable(),
            },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
            },
            _ => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<hypnos_core::ConfigError> for ApiError {
    fn from(err: hypnos_core::ConfigError) -> Self {
        Self::from(HypnosError::from(err))
    }
}

impl From<hypnos_core::BluetoothError> for ApiError {
    fn from(err: hypnos_core::BluetoothError) -> Self {
        Self::from(HypnosError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypnos_core::ConnectionState;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::BadRequest {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Bad Request"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse::plain("test_error".to_string(), "Test message".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
    }

    #[test]
    fn test_state_errors_become_conflicts() {
        let err = ApiError::from(HypnosError::AlreadyActive {
            state: ConnectionState::Syncing,
        });
        match err {
            ApiError::Conflict {
                error_code, state, ..
            } => {
                assert_eq!(error_code, "already_active");
                assert_eq!(state.as_deref(), Some("syncing"));
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_status_codes_follow_core_mapping() {
        let cases = [
            (HypnosError::InvalidAddress("x".into()), StatusCode::BAD_REQUEST),
            (HypnosError::ConnectionFailure("gone".into()), StatusCode::BAD_GATEWAY),
            (HypnosError::ScanFailure("busy".into()), StatusCode::SERVICE_UNAVAILABLE),
            (HypnosError::EngineStopped, StatusCode::SERVICE_UNAVAILABLE),
            (
                HypnosError::PersistenceError("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
