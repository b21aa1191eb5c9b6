// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::image::{CompressionError, ValidationError};

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upload rejected before compression (type or size).
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The uploaded bytes could not be decoded as an image.
    #[error("Could not decode image: {0}")]
    Decode(String),

    /// A client tried to write a field it must never write (e.g. `role`).
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upload cancelled")]
    UploadCancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CompressionError> for AppError {
    fn from(err: CompressionError) -> Self {
        match err {
            CompressionError::Decode(msg) => AppError::Decode(msg),
            CompressionError::Encode(msg) => {
                AppError::Internal(anyhow::anyhow!("JPEG encoding failed: {msg}"))
            }
        }
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
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                Some(err.to_string()),
            ),
            AppError::Decode(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "decode_error",
                Some(msg.clone()),
            ),
            AppError::SecurityViolation(msg) => {
                tracing::warn!(reason = %msg, "Rejected security-violating request");
                (StatusCode::FORBIDDEN, "security_violation", Some(msg.clone()))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            AppError::UploadCancelled => (StatusCode::CONFLICT, "upload_cancelled", None),
            AppError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::BAD_GATEWAY, "storage_error", None)
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
