//! Standardized error handling for API responses.
//!
//! Provides consistent JSON error responses across all API endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use ecs_scheduler_common::{FieldErrors, JobError};

/// Standard API error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,

    /// Error code for programmatic handling
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Field-level validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<FieldErrors>,

    /// Resource state already committed before the error occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,

    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
            messages: None,
            item: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_messages(mut self, messages: FieldErrors) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_item(mut self, item: Value) -> Self {
        self.item = Some(item);
        self
    }
}

/// API error types with standardized responses
#[derive(Debug)]
pub enum ApiError {
    /// 500 Internal Server Error
    Internal(String),

    /// 404 Not Found
    NotFound(String),

    /// 400 Bad Request
    BadRequest(String),

    /// 400 Bad Request with field-level validation errors
    Validation(FieldErrors),

    /// 409 Conflict
    Conflict(String),

    /// 415 Unsupported Media Type
    UnsupportedMediaType,

    /// 500 after the change was persisted but the scheduler was not told
    DeliveryFailed { item: Value },
}

impl ApiError {
    /// Convert error to ErrorResponse
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            ApiError::Internal(msg) => {
                error!("Internal API error: {}", msg);
                ErrorResponse::new(500, "INTERNAL_ERROR", msg)
            }
            ApiError::NotFound(msg) => ErrorResponse::new(404, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => ErrorResponse::new(400, "BAD_REQUEST", msg),
            ApiError::Validation(errors) => {
                ErrorResponse::new(400, "BAD_REQUEST", "Validation failed")
                    .with_messages(errors.clone())
            }
            ApiError::Conflict(msg) => ErrorResponse::new(409, "CONFLICT", msg),
            ApiError::UnsupportedMediaType => ErrorResponse::new(
                415,
                "UNSUPPORTED_MEDIA_TYPE",
                "Request requires Content-Type: application/json",
            ),
            ApiError::DeliveryFailed { item } => ErrorResponse::new(
                500,
                "INTERNAL_ERROR",
                "Job update was saved correctly but failed to post update message to scheduler",
            )
            .with_item(item.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = self.to_error_response();
        let status_code = StatusCode::from_u16(error_response.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status_code, Json(error_response)).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::NotFound(format!("Job {id} does not exist")),
            JobError::AlreadyExists(id) => ApiError::Conflict(format!("Job {id} already exists")),
            JobError::InvalidData { errors, .. } => ApiError::Validation(errors),
            JobError::Persistence { job_id, source } => {
                error!(
                    "Persistence failure for job {}: {source}",
                    job_id.as_deref().unwrap_or("<registry>")
                );
                ApiError::Internal("Job persistence failed".to_string())
            }
            JobError::FieldsRequirePersistence { fields, .. } => {
                ApiError::BadRequest(format!("Fields require persistence: {fields:?}"))
            }
            JobError::ImmutableFields { fields, .. } => {
                ApiError::BadRequest(format!("Fields cannot be modified: {fields:?}"))
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {err}"))
    }
}
