use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Domain error taxonomy rendered uniformly at the HTTP boundary.
///
/// Every variant carries a client-safe message; infrastructure failures are
/// logged server-side and replaced with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or missing caller input.
    #[error("{0}")]
    Validation(String),

    /// Uniqueness violation (username or email already taken).
    #[error("{0}")]
    Conflict(String),

    /// No matching entity.
    #[error("{0}")]
    NotFound(String),

    /// Credential or token failure.
    #[error("{0}")]
    Auth(String),

    /// The external media store rejected or failed an upload.
    #[error("{0}")]
    Upload(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Auth(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::Upload(msg) => {
                error!(error = %msg, "media upload failed");
                (StatusCode::BAD_GATEWAY, "UPLOAD_FAILED", msg.clone())
            }
            ApiError::Database(err) => classify_sqlx_error(err),
            ApiError::Internal(err) => {
                error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "an internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// `RowNotFound` maps to 404; a PostgreSQL unique-constraint violation (23505)
/// on the users table maps to 409; everything else is a sanitized 500.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => (
            StatusCode::CONFLICT,
            "CONFLICT",
            "username or email already in use".to_string(),
        ),
        other => {
            error!(error = %other, "database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "an internal error occurred".to_string(),
            )
        }
    }
}
