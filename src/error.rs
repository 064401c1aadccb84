//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{AmountError, DomainError};
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Unknown request user")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Service busy, retry the request")]
    Busy,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ImmutableRecord(what) => {
                AppError::Domain(DomainError::ImmutabilityViolation(what))
            }
            StoreError::StatusConflict { found, requested } => {
                AppError::Domain(DomainError::InvalidStatusTransition {
                    from: found,
                    to: requested,
                })
            }
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Duplicate(what) => AppError::Conflict(what),
            StoreError::LockTimeout => AppError::Busy,
            other => AppError::Storage(other),
        }
    }
}

impl From<AmountError> for AppError {
    fn from(err: AmountError) -> Self {
        AppError::Domain(err.into())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }

            // 401 Unauthorized
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),

            // 403 Forbidden
            AppError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "not_found", Some(what.clone()))
            }

            // 409 Conflict
            AppError::Conflict(what) => (StatusCode::CONFLICT, "conflict", Some(what.clone())),

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => {
                if domain_err.is_client_error() {
                    tracing::debug!(error = %domain_err, "Request rejected by business rule");
                }
                match domain_err {
                    DomainError::InvalidTransaction(msg) => {
                        (StatusCode::BAD_REQUEST, "invalid_transaction", Some(msg.clone()))
                    }
                    DomainError::RecipientNotFound(id) => {
                        (StatusCode::NOT_FOUND, "recipient_not_found", Some(id.clone()))
                    }
                    DomainError::InsufficientBalance { .. } => (
                        StatusCode::BAD_REQUEST,
                        "insufficient_balance",
                        Some(domain_err.to_string()),
                    ),
                    DomainError::InvalidStatusTransition { .. } => (
                        StatusCode::CONFLICT,
                        "invalid_status_transition",
                        Some(domain_err.to_string()),
                    ),
                    DomainError::InvalidAuditPayload(msg) => {
                        (StatusCode::BAD_REQUEST, "invalid_audit_payload", Some(msg.clone()))
                    }
                    DomainError::ImmutabilityViolation(what) => {
                        tracing::error!(
                            record = %what,
                            "Attempted mutation of an immutable record"
                        );
                        (StatusCode::INTERNAL_SERVER_ERROR, "immutability_violation", None)
                    }
                }
            }

            // 503 Service Unavailable
            AppError::Busy => {
                tracing::warn!("Lock wait timed out");
                (StatusCode::SERVICE_UNAVAILABLE, "busy", None)
            }

            // 500 Internal Server Error
            AppError::Storage(e) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        // Server-side failures do not leak their message
        let error = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_store_errors_become_domain_errors() {
        let err: AppError = StoreError::ImmutableRecord("audit_logs".into()).into();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::ImmutabilityViolation(ref t)) if t == "audit_logs"
        ));

        let err: AppError = StoreError::StatusConflict {
            found: TransactionStatus::Completed,
            requested: TransactionStatus::Failed,
        }
        .into();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::InvalidStatusTransition {
                from: TransactionStatus::Completed,
                to: TransactionStatus::Failed
            })
        ));

        assert!(matches!(AppError::from(StoreError::LockTimeout), AppError::Busy));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Domain(DomainError::invalid_transaction("x")), StatusCode::BAD_REQUEST),
            (AppError::Domain(DomainError::RecipientNotFound("1".into())), StatusCode::NOT_FOUND),
            (
                AppError::Domain(DomainError::insufficient_balance(dec!(100), dec!(50))),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Domain(DomainError::ImmutabilityViolation("audit_logs".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AppError::Busy, StatusCode::SERVICE_UNAVAILABLE),
            (
                AppError::Storage(StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_client_domain_errors_are_4xx() {
        let errors = [
            DomainError::invalid_transaction("x"),
            DomainError::RecipientNotFound("1".into()),
            DomainError::insufficient_balance(dec!(100), dec!(50)),
            DomainError::ImmutabilityViolation("audit_logs".into()),
        ];

        for err in errors {
            let client = err.is_client_error();
            let status = AppError::Domain(err).into_response().status();
            assert_eq!(client, status.is_client_error(), "{}", status);
        }
    }
}
