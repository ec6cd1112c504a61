// error.rs — Error taxonomy for the REST boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::storage::StoreError;

/// Errors surfaced to HTTP callers.
///
/// Every variant maps to exactly one status code and the body is always
/// `{ "error": <message> }`. Storage failures log the underlying cause for
/// operators and expose only a generic message to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed required input → 400.
    #[error("{0}")]
    Validation(String),
    /// Unknown streak id → 404.
    #[error("Streak not found")]
    NotFound,
    /// Underlying persistence failure → 500.
    #[error("{context}")]
    Storage {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ApiError {
    /// Map a store failure onto the boundary taxonomy, preserving the
    /// distinct NotFound and validation kinds and wrapping everything else
    /// behind a generic per-operation message.
    pub fn from_store(err: StoreError, context: &'static str) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            e @ (StoreError::MissingDelta | StoreError::InvalidDelta) => {
                ApiError::Validation(e.to_string())
            }
            other => ApiError::Storage {
                context,
                source: other,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage { context, source } => {
                error!(err = %source, "{context}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
