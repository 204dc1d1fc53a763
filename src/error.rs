//! # Error Handling
//!
//! Application error type and its mapping to HTTP responses.
//!
//! ## Error Categories:
//! - **Internal / ConfigError**: server-side problems (500)
//! - **BadRequest / ValidationError**: the client sent something unusable (400)
//! - **MediaUnavailable**: no source video could be loaded for a session (400)
//! - **NotFound**: unknown session or resource (404)
//! - **Conflict**: the session is owned by another transport (409)
//! - **CapacityExceeded**: the session limit is reached (503)
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "media_unavailable",
//!     "message": "no usable source video (gesture: ..., idle: ...)",
//!     "timestamp": "2026-01-01T12:00:00Z"
//!   }
//! }
//! ```

use crate::avatar::session::{RegistryError, RequestError};
use crate::video::error::FrameError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    ConfigError(String),
    ValidationError(String),
    MediaUnavailable(String),
    CapacityExceeded(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::MediaUnavailable(msg) => (StatusCode::BAD_REQUEST, "media_unavailable", msg),
            AppError::CapacityExceeded(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "capacity_exceeded", msg)
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::MediaUnavailable(msg) => write!(f, "Media unavailable: {}", msg),
            AppError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed JSON is the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Frame set failures reach clients only when a session cannot start.
impl From<FrameError> for AppError {
    fn from(err: FrameError) -> Self {
        AppError::MediaUnavailable(err.to_string())
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::CapacityExceeded { .. } => AppError::CapacityExceeded(err.to_string()),
            RegistryError::DuplicateId(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use std::path::PathBuf;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::CapacityExceeded("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let media: AppError = FrameError::NoUsableSource {
            gesture: PathBuf::from("g.mp4"),
            idle: PathBuf::from("i.mp4"),
        }
        .into();
        assert_eq!(media.status_code(), StatusCode::BAD_REQUEST);

        let capacity: AppError = RegistryError::CapacityExceeded { max: 1 }.into();
        assert_eq!(capacity.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_error_body() {
        let response = AppError::MediaUnavailable("no video".into()).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "media_unavailable");
        assert_eq!(json["error"]["message"], "no video");
        assert!(json["error"]["timestamp"].is_string());
    }
}
