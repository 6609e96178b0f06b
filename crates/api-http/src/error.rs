//! API Error Types
//!
//! Maps application errors to HTTP status codes and JSON bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scanq_core::error::AppError;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

/// Error returned by a Control API handler
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Rate limit exceeded. Please slow down.")]
    RateLimited,
}

pub fn json_error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn message(status: StatusCode, msg: impl Into<String>) -> Response {
    json_error(status, json!({ "error": msg.into() }))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let app = match self {
            ApiError::BadRequest(msg) => return message(StatusCode::BAD_REQUEST, msg),
            ApiError::RateLimited => {
                return message(StatusCode::TOO_MANY_REQUESTS, ApiError::RateLimited.to_string())
            }
            ApiError::App(e) => e,
        };

        match app {
            AppError::UnknownModule { available, .. } => json_error(
                StatusCode::BAD_REQUEST,
                json!({ "error": "Unknown module", "available": available }),
            ),
            AppError::Validation(msg) => message(StatusCode::BAD_REQUEST, msg),
            e @ (AppError::Domain(_) | AppError::Serialization(_)) => {
                message(StatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::JobNotFound(id) => json_error(
                StatusCode::NOT_FOUND,
                json!({ "error": "Job not found", "job_id": id }),
            ),
            e @ (AppError::Conflict(_) | AppError::InvalidState(_)) => {
                message(StatusCode::CONFLICT, e.to_string())
            }
            AppError::Backend(detail) => {
                error!(error = %detail, "Queue backend unavailable");
                message(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("Queue backend error: {}", detail),
                )
            }
            e @ (AppError::Config(_) | AppError::Internal(_)) => {
                error!(error = %e, "Internal error");
                message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}
