// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum for the HTTP surface.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., attempt already finalized)
    Conflict(String),

    // 410 Gone - the attempt's time budget has run out server-side.
    // Carries a flag the client uses to trigger local forced submission.
    AttemptExpired,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::AttemptExpired => (
                StatusCode::GONE,
                json!({ "error": "Time expired. Attempt auto-submitted.", "time_expired": true }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Synchronous rejections raised by the session engine.
///
/// These are user-input errors in the sense of the error taxonomy: they are
/// returned to the caller without mutating any session state. Integrity
/// events (focus loss, drift) are not errors and never appear here.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("exam already started")]
    AlreadyStarted,

    #[error("exam is not in progress")]
    NotInProgress,

    #[error("option index {0} is out of range for the current question")]
    InvalidOption(usize),

    #[error("no question at {section}-{ordinal}")]
    InvalidPosition { section: String, ordinal: usize },

    #[error("unknown section '{0}'")]
    UnknownSection(String),

    #[error("question bank is empty")]
    EmptyBank,
}
