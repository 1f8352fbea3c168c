//! `ApiError`: the HTTP-facing error taxonomy, grounded on the teacher's
//! `WebError` — one enum implementing `IntoResponse`, mapping lower-layer
//! errors onto the status codes and machine-readable codes the control
//! protocol promises, with every response body shaped the same way.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use pageforge_engine::EngineError;
use pageforge_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid PDF: {0}")]
    InvalidPdf(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("insufficient credits: required {required} but only {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("job {0} is already in a terminal state")]
    AlreadyTerminal(i64),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPdf(_) => "INVALID_PDF",
            ApiError::InvalidSettings(_) => "INVALID_SETTINGS",
            ApiError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::AlreadyTerminal(_) => "ALREADY_TERMINAL",
            ApiError::Engine(EngineError::JobNotFound(_)) => "NOT_FOUND",
            ApiError::Engine(EngineError::AlreadyTerminal(_)) => "ALREADY_TERMINAL",
            ApiError::Engine(EngineError::InsufficientCredits(_)) => "INSUFFICIENT_CREDITS",
            ApiError::Engine(_) => "INTERNAL",
            ApiError::Store(StoreError::JobNotFound(_)) | ApiError::Store(StoreError::ChunkNotFound(_)) => "NOT_FOUND",
            ApiError::Store(_) => "INTERNAL",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidPdf(_) | ApiError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
            ApiError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyTerminal(_) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::AlreadyTerminal(_)) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::InsufficientCredits(_)) => StatusCode::PAYMENT_REQUIRED,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(StoreError::JobNotFound(_)) | ApiError::Store(StoreError::ChunkNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
