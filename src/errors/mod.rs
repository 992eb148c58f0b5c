//! Unified error handling with consistent API response envelope.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Error detail in the API response envelope.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

/// Consistent JSON envelope for all API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap a successful result in the envelope.
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            data: Some(data),
            error: None,
        })
    }

    /// Wrap an error in the envelope.
    pub fn error(code: &str, message: &str) -> Json<Self> {
        Json(Self {
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
                causes: Vec::new(),
            }),
        })
    }
}

/// Every failure collected by one bounded fan-out pass.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<AppError>,
}

impl AggregateError {
    pub fn new(errors: Vec<AppError>) -> Self {
        Self { errors }
    }

    pub fn push(&mut self, err: AppError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[AppError] {
        &self.errors
    }

    /// `Err(self)` when at least one error was collected.
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 { "error" } else { "errors" };
        write!(f, "{} {noun} occurred", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Application error type mapping to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Sequence error: {0}")]
    Sequence(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Match rules not saved: {0}")]
    RuleSetNotSaved(String),

    #[error("{0}")]
    Aggregate(#[from] AggregateError),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Check if this error represents a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error represents an auth failure.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Check if this error was raised before any side effect took place.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut causes = Vec::new();
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::MalformedPayload(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "MALFORMED_PAYLOAD",
                msg.clone(),
            ),
            AppError::Sequence(msg) | AppError::Persistence(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_ERROR",
                    msg.clone(),
                )
            }
            AppError::RuleSetNotSaved(msg) => {
                tracing::error!(error = %msg, "Services reparsed but match rules were not saved");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "RULE_SET_NOT_SAVED",
                    msg.clone(),
                )
            }
            AppError::Aggregate(agg) => {
                causes = agg.errors().iter().map(ToString::to_string).collect();
                (
                    StatusCode::BAD_GATEWAY,
                    "AGGREGATE_ERROR",
                    format!("{} lookup(s) failed", agg.len()),
                )
            }
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::BAD_GATEWAY, "SERVICE_UNAVAILABLE", msg.clone())
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()> {
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message,
                causes,
            }),
        };

        (status, Json(body)).into_response()
    }
}
