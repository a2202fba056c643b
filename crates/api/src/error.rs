use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use embryoscore_core::detection::DetectionError;
use embryoscore_core::error::CoreError;
use embryoscore_core::frame::FrameError;
use embryoscore_pipeline::{PipelineError, StoreError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`PipelineError`] and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses of the form `{ "error": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `embryoscore_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A failure from the job pipeline (store, dispatch, detection).
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Pipeline(PipelineError::Store(err))
    }
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type ErrorParts = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Pipeline(err) => classify_pipeline_error(err),
            AppError::Database(err) => classify_sqlx_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> ErrorParts {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core_error(err: &CoreError) -> ErrorParts {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
        }
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

fn classify_pipeline_error(err: &PipelineError) -> ErrorParts {
    match err {
        PipelineError::Store(store) => match store {
            StoreError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} with id {id} not found"),
            ),
            StoreError::Stale(msg) => (StatusCode::CONFLICT, "STALE_WRITE", msg.clone()),
            StoreError::Invalid(core) => classify_core_error(core),
            StoreError::Database(db) => classify_sqlx_error(db),
        },
        PipelineError::Dispatch(dispatch) => {
            tracing::warn!(error = %dispatch, "Worker dispatch failed");
            (
                StatusCode::BAD_GATEWAY,
                "DISPATCH_FAILED",
                format!("Worker dispatch failed: {dispatch}"),
            )
        }
        PipelineError::Detection(detection) => classify_detection_error(detection),
        PipelineError::Busy(_) => (StatusCode::CONFLICT, "BUSY", err.to_string()),
        PipelineError::Cancelled => (
            StatusCode::SERVICE_UNAVAILABLE,
            "CANCELLED",
            "The request was cancelled during shutdown".to_string(),
        ),
    }
}

fn classify_detection_error(err: &DetectionError) -> ErrorParts {
    match err {
        DetectionError::Frame(FrameError::MediaNotFound(media)) => (
            StatusCode::NOT_FOUND,
            "MEDIA_NOT_FOUND",
            format!("Media not found: {media}"),
        ),
        DetectionError::Frame(
            frame @ (FrameError::Decode(_) | FrameError::EmptyFrame | FrameError::ParseError(_)),
        ) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "UNREADABLE_MEDIA",
            frame.to_string(),
        ),
        DetectionError::Frame(frame) => {
            tracing::error!(error = %frame, "Frame extraction failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "DETECTION_UNAVAILABLE",
                "Frame extraction is unavailable".to_string(),
            )
        }
        DetectionError::BackendUnavailable(msg) => {
            tracing::error!(error = %msg, "Detection backend unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "DETECTION_UNAVAILABLE",
                "Detection backend is unavailable".to_string(),
            )
        }
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Foreign key violations (code 23503) map to 404 for the referenced row.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> ErrorParts {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            match db_err.code().as_deref() {
                Some("23505") => {
                    let constraint = db_err.constraint().unwrap_or("unknown");
                    if constraint.starts_with("uq_") {
                        return (
                            StatusCode::CONFLICT,
                            "CONFLICT",
                            format!("Duplicate value violates unique constraint: {constraint}"),
                        );
                    }
                }
                Some("23503") => {
                    return (
                        StatusCode::NOT_FOUND,
                        "NOT_FOUND",
                        "Referenced resource not found".to_string(),
                    );
                }
                _ => {}
            }
            tracing::error!(error = %db_err, "Database error");
            internal()
        }
        other => {
            tracing::error!(error = %other, "Database error");
            internal()
        }
    }
}
