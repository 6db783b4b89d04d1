use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::error_response;
use crate::conversation::session::ContextSummary;
use crate::llm::synthesis::truncate_chars;
use crate::llm::SynthesisMode;
use crate::models::{
    CloserLookRequest, CloserLookResponse, ContextHistoryResponse, ConverseRequest,
    ConverseResponse,
};
use crate::state::AppState;

const MAX_CHAT_MESSAGE_LEN: usize = 2000;

/// POST /api/converse - One conversational turn, with retrieval when the
/// message calls for it.
pub async fn converse(
    State(state): State<AppState>,
    Json(req): Json<ConverseRequest>,
) -> Result<Json<ConverseResponse>, (StatusCode, String)> {
    // ── Step 1: Validate input ────────────────────────────
    let message = req.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message is required".to_string()));
    }
    let message = truncate_chars(message, MAX_CHAT_MESSAGE_LEN);

    // ── Step 2: Acquire semaphore ─────────────────────────
    let _permit = state
        .synthesis_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Chat service at capacity".to_string(),
            )
        })?;

    // ── Step 3: Run the turn ──────────────────────────────
    let reply = state
        .pipeline
        .converse(&req.context_id, &message)
        .await
        .map_err(error_response)?;

    Ok(Json(ConverseResponse { reply }))
}

/// GET /api/contexts/{context_id}/summary - Conversation state for a context
pub async fn summary(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> Json<ContextSummary> {
    Json(state.pipeline.summary(&context_id))
}

/// GET /api/contexts/{context_id}/history - Messages of the active conversation
pub async fn history(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> Json<ContextHistoryResponse> {
    let messages = state.pipeline.history(&context_id);
    Json(ContextHistoryResponse {
        context_id,
        messages,
    })
}

/// POST /api/closer-look - Deep analysis of one transcript
pub async fn closer_look(
    State(state): State<AppState>,
    Json(req): Json<CloserLookRequest>,
) -> Result<Json<CloserLookResponse>, (StatusCode, String)> {
    let mode = if req.unbounded {
        SynthesisMode::Unbounded
    } else {
        SynthesisMode::Bounded
    };

    let _permit = state
        .synthesis_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Chat service at capacity".to_string(),
            )
        })?;

    let analysis = state
        .pipeline
        .closer_look(&req.context_id, &req.transcript_name, &req.topic, mode)
        .await
        .map_err(error_response)?;

    Ok(Json(CloserLookResponse {
        transcript_name: req.transcript_name,
        analysis,
    }))
}
