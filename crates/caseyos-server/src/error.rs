//! API error types for the CaseyOS gateway.
//!
//! Maps core domain errors to HTTP status codes and JSON error responses:
//! validation 400, auth 401, not-found 404, conflict 409, rate-limited 429
//! (with `Retry-After`), timeout 504, connector 502, everything else 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use caseyos_core::connector::{ConnectorError, ConnectorErrorKind};
use caseyos_core::error::StorageError;

/// API error type for route handlers.
pub enum ApiError {
    /// Input shape or contract violated.
    Validation(String),
    /// Missing or invalid credentials.
    Auth(String),
    /// Requested resource not found.
    NotFound(String),
    /// Conflict: replay, illegal state transition, or a closed gate.
    Conflict(serde_json::Value),
    /// Local rate limiter blocked the action.
    RateLimited {
        retry_after_secs: u64,
        body: serde_json::Value,
    },
    /// A step exceeded its budget.
    Timeout(String),
    /// Upstream connector failure.
    Connector(ConnectorError),
    /// Internal storage/database error.
    Storage(StorageError),
    /// Anything else.
    Internal(String),
}

impl ApiError {
    /// A conflict with a machine-readable reason.
    pub fn conflict_reason(reason: &str) -> Self {
        Self::Conflict(json!({ "reason": reason }))
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        match err.kind {
            ConnectorErrorKind::AuthExpired => Self::Auth(err.to_string()),
            _ => Self::Connector(err),
        }
    }
}

impl From<caseyos_core::outcome::OutcomeError> for ApiError {
    fn from(err: caseyos_core::outcome::OutcomeError) -> Self {
        match err {
            caseyos_core::outcome::OutcomeError::Invalid(msg) => Self::Validation(msg),
            caseyos_core::outcome::OutcomeError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<caseyos_core::ingest::IngestError> for ApiError {
    fn from(err: caseyos_core::ingest::IngestError) -> Self {
        use caseyos_core::ingest::IngestError;
        match err {
            IngestError::InvalidPayload(msg) | IngestError::UnknownSource(msg) => {
                Self::Validation(msg)
            }
            IngestError::Storage(e) => Self::Storage(e),
            IngestError::Outcome(e) => e.into(),
        }
    }
}

impl From<caseyos_core::executor::ExecutorError> for ApiError {
    fn from(err: caseyos_core::executor::ExecutorError) -> Self {
        use caseyos_core::executor::ExecutorError;
        match err {
            ExecutorError::Invalid(msg) => Self::Validation(msg),
            ExecutorError::Storage(e) => Self::Storage(e),
            ExecutorError::Connector(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(msg) => {
                (StatusCode::BAD_REQUEST, axum::Json(json!({ "error": msg }))).into_response()
            }
            Self::Auth(msg) => {
                (StatusCode::UNAUTHORIZED, axum::Json(json!({ "error": msg }))).into_response()
            }
            Self::NotFound(msg) => {
                (StatusCode::NOT_FOUND, axum::Json(json!({ "error": msg }))).into_response()
            }
            Self::Conflict(body) => (StatusCode::CONFLICT, axum::Json(body)).into_response(),
            Self::RateLimited {
                retry_after_secs,
                body,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after_secs.to_string())],
                axum::Json(body),
            )
                .into_response(),
            Self::Timeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, axum::Json(json!({ "error": msg }))).into_response()
            }
            Self::Connector(e) => {
                tracing::error!("connector error: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    axum::Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
            Self::Storage(e) => {
                tracing::error!("storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
            Self::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({ "error": msg })),
                )
                    .into_response()
            }
        }
    }
}
