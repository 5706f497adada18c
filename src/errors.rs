use crate::services::enqueue_service::EnqueueError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<EnqueueError> for AppError {
    fn from(err: EnqueueError) -> Self {
        match err {
            EnqueueError::Validation(msg) => AppError::bad_request(msg),
            EnqueueError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, err.to_string()),
            EnqueueError::Unprocessable(msg) => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, msg)
            }
            EnqueueError::Extract(extract) => AppError::new(extract.status, extract.message),
            EnqueueError::ObjectStore(_) | EnqueueError::Database(_) => {
                tracing::error!("enqueue request failed: {}", err);
                AppError::internal(err.to_string())
            }
        }
    }
}
