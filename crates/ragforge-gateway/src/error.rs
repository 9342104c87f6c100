use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ragforge_core::RagError;
use tracing::{error, warn};

/// An error rendered as `{"error": ..., "kind": ...}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Machine-readable error class.
    pub kind: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// An error with an explicit status and kind.
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    /// Status and kind reported for a service error.
    pub fn classify(err: &RagError) -> (StatusCode, &'static str) {
        match err {
            RagError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            RagError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RagError::Unauthorized(_) => (StatusCode::FORBIDDEN, "forbidden"),
            RagError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            RagError::Config(_) => (StatusCode::UNPROCESSABLE_ENTITY, "config"),
            RagError::Ingestion(_) => (StatusCode::UNPROCESSABLE_ENTITY, "ingestion"),
            RagError::Embedding(_) | RagError::Llm(_) | RagError::Http(_) => {
                (StatusCode::BAD_GATEWAY, "upstream")
            }
            RagError::VectorStore(_) | RagError::RetryExhausted { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "vector_store")
            }
            RagError::Json(_) => (StatusCode::BAD_REQUEST, "json"),
            RagError::Store(_) | RagError::Storage(_) | RagError::Stream(_) | RagError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        }
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        let (status, kind) = Self::classify(&err);
        if status.is_server_error() {
            error!(error = %err, kind, "Request failed");
        } else {
            warn!(error = %err, kind, "Request rejected");
        }
        Self::new(status, kind, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "kind": self.kind,
        });
        (self.status, Json(body)).into_response()
    }
}
