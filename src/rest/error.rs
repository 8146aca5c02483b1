use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use crate::tasks::{FieldError, TaskError};

/// HTTP-facing error. Validation carries field-level detail; everything
/// infrastructure-shaped collapses to an opaque 500 with the detail logged.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation(Vec<FieldError>),
    Internal(anyhow::Error),
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound => ApiError::NotFound,
            TaskError::Forbidden => ApiError::Forbidden,
            TaskError::Invalid(errors) => ApiError::Validation(errors),
            TaskError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Unauthenticated." })),
            )
                .into_response(),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(json!({ "message": "You are not authorized to access this task." })),
            )
                .into_response(),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": "Task not found." })),
            )
                .into_response(),
            ApiError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "message": "The given data was invalid.",
                    "errors": field_error_map(errors),
                })),
            )
                .into_response(),
            ApiError::Internal(e) => {
                error!(err = %e, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "Internal server error." })),
                )
                    .into_response()
            }
        }
    }
}

/// Group field errors into `{field: [messages…]}`.
fn field_error_map(errors: Vec<FieldError>) -> Value {
    let mut map = serde_json::Map::new();
    for (field, message) in errors {
        match map.get_mut(field) {
            Some(Value::Array(messages)) => messages.push(json!(message)),
            _ => {
                map.insert(field.to_string(), json!([message]));
            }
        }
    }
    Value::Object(map)
}
