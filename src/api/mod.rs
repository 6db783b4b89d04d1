pub mod chat;
pub mod search;
pub mod transcripts;

use axum::http::StatusCode;

use crate::error::RagError;

/// Map a pipeline error onto the `(status, message)` pair handlers return.
pub fn error_response(err: RagError) -> (StatusCode, String) {
    let status = match &err {
        RagError::Validation(_) => StatusCode::BAD_REQUEST,
        RagError::Superseded(_) => StatusCode::CONFLICT,
        RagError::PermanentProvider(_) | RagError::RejectedInput(_) => StatusCode::BAD_GATEWAY,
        RagError::TransientProvider(_) => StatusCode::SERVICE_UNAVAILABLE,
        RagError::Capacity(_) => StatusCode::INSUFFICIENT_STORAGE,
        RagError::Storage(_) | RagError::DimensionMismatch { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {err}");
    }
    (status, err.to_string())
}
