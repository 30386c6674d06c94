use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;

use shopforge_saga::{SagaError, ValidationError};

/// Errors a provisioning handler can answer with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid run id {0:?}")]
    InvalidRunId(String),

    #[error("run {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match &self {
            ApiError::Validation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                axum::Json(json!({
                    "error": "validation_error",
                    "field": err.field(),
                    "message": err.to_string(),
                })),
            )
                .into_response(),
            ApiError::InvalidRunId(_) => {
                json_error(StatusCode::BAD_REQUEST, "invalid_run_id", self.to_string())
            }
            ApiError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", self.to_string()),
            ApiError::Saga(SagaError::RunFinished(_)) => {
                json_error(StatusCode::CONFLICT, "run_finished", self.to_string())
            }
            ApiError::Saga(_) => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "saga_error",
                self.to_string(),
            ),
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
