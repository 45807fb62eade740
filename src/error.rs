// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    State(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Booking {0} was modified concurrently")]
    ConcurrentModification(Uuid),

    #[error("No calendar credential stored for user {0}")]
    NoCredential(Uuid),

    #[error("Calendar sync error: {0}")]
    CalendarSync(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker returned when Google rejects a refresh token.
    pub const INVALID_GRANT: &'static str = "invalid_grant";

    /// Errors coming from the external calendar path.
    ///
    /// The lifecycle engine logs these instead of failing the operation.
    pub fn is_calendar_error(&self) -> bool {
        matches!(self, AppError::CalendarSync(_) | AppError::NoCredential(_))
    }

    /// Google answered a refresh with `invalid_grant`.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, AppError::CalendarSync(msg) if msg.contains(Self::INVALID_GRANT))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::State(msg) => (StatusCode::CONFLICT, "invalid_state", Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            AppError::ConcurrentModification(_) => (
                StatusCode::CONFLICT,
                "concurrent_modification",
                Some(self.to_string()),
            ),
            AppError::NoCredential(_) => (
                StatusCode::BAD_GATEWAY,
                "calendar_not_connected",
                Some(self.to_string()),
            ),
            AppError::CalendarSync(msg) => {
                (StatusCode::BAD_GATEWAY, "calendar_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
