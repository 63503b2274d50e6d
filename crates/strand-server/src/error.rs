use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use strand_core::error::{GuardError, StrandError};

use crate::registry::AlreadyRunning;

/// Application error type that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Strand(StrandError),
    Internal(String),
}

impl From<StrandError> for AppError {
    fn from(err: StrandError) -> Self {
        AppError::Strand(err)
    }
}

impl From<AlreadyRunning> for AppError {
    fn from(err: AlreadyRunning) -> Self {
        AppError::Conflict(format!("Thread {} is already running", err.0))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Strand(StrandError::Guard(GuardError::RateLimited { .. })) => {
                (StatusCode::TOO_MANY_REQUESTS, "Rate limited".into())
            }
            AppError::Strand(StrandError::Guard(GuardError::RecursionLimit { limit })) => (
                StatusCode::BAD_REQUEST,
                format!("Recursion limit ({limit}) exceeded"),
            ),
            AppError::Strand(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
