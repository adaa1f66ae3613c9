//! Error types shared by the store, the review service and the HTTP layer.

use serde::Serialize;
use thiserror::Error;

/// Failure inside a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The ratings collection enforces one rating per user.
    #[error("user {0} already has a rating")]
    DuplicateRating(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application-level error taxonomy
///
/// Every variant maps onto exactly one HTTP status (see the `web` feature
/// `IntoResponse` impl). Store failures keep their detail for the server log
/// and are reported to clients with a generic message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    /// Duplicate submission. `status` lets routes pick 400 or 409.
    #[error("{message}")]
    Conflict { message: String, status: u16 },

    #[error("{0}")]
    NotFound(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("admin access required")]
    Forbidden,

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            status: 409,
        }
    }

    /// Conflict reported as 400, used by the popup submission route.
    pub fn conflict_bad_request(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            status: 400,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => 400,
            AppError::Conflict { status, .. } => *status,
            AppError::NotFound(_) => 404,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::RateLimited(_) => 429,
            AppError::Store(StoreError::DuplicateRating(_)) => 409,
            AppError::Store(_) => 500,
        }
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(feature = "web")]
pub use response::ApiJson;

#[cfg(feature = "web")]
mod response {
    use super::{AppError, FieldError, StoreError};
    use axum::{
        Json,
        extract::{FromRequest, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Response},
    };

    /// JSON body whose rejections are reported as [`AppError`] (400 with
    /// field detail) instead of axum's plain-text 422
    #[derive(Debug, FromRequest)]
    #[from_request(via(Json), rejection(AppError))]
    pub struct ApiJson<T>(pub T);

    const DATA_ERROR_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

    /// Split `"remindDays: invalid type: ..."` into the field path and the
    /// serde message. Errors at the document root carry no path.
    pub(super) fn split_data_error(text: &str) -> FieldError {
        let detail = text.strip_prefix(DATA_ERROR_PREFIX).unwrap_or(text);
        match detail.split_once(": ") {
            Some((path, message)) if !path.is_empty() && !path.contains(' ') => {
                FieldError::new(path, message)
            }
            _ => FieldError::new("body", detail),
        }
    }

    impl From<JsonRejection> for AppError {
        fn from(rejection: JsonRejection) -> Self {
            match rejection {
                JsonRejection::JsonDataError(e) => {
                    AppError::Validation(vec![split_data_error(&e.body_text())])
                }
                JsonRejection::JsonSyntaxError(_) => {
                    AppError::BadRequest("Request body is not valid JSON".to_string())
                }
                JsonRejection::MissingJsonContentType(_) => {
                    AppError::BadRequest("Expected a JSON request body".to_string())
                }
                other => AppError::BadRequest(other.body_text()),
            }
        }
    }

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status =
                StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

            let body = match &self {
                AppError::Validation(errors) => serde_json::json!({ "errors": errors }),
                AppError::Store(StoreError::DuplicateRating(_)) => serde_json::json!({
                    "error": "Rating already exists",
                    "message": "You have already submitted a rating. You can update it instead.",
                }),
                AppError::Store(e) => {
                    log::error!("store failure: {}", e);
                    serde_json::json!({
                        "error": "Internal server error",
                        "message": "Internal server error",
                    })
                }
                other => serde_json::json!({ "error": other.to_string() }),
            };

            (status, Json(body)).into_response()
        }
    }
}
