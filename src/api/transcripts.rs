use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::error_response;
use crate::chunking::sections::ReportSections;
use crate::models::{
    DeleteContextResponse, IngestRequest, ListTranscriptsQuery, TranscriptHandle,
    TranscriptSummary, TranscriptTextResponse,
};
use crate::state::AppState;

/// Upper bound on a single ingested transcript, in bytes.
const MAX_TRANSCRIPT_BYTES: usize = 5 * 1024 * 1024;

/// POST /api/transcripts - Chunk, embed and store a transcript
pub async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<TranscriptHandle>), (StatusCode, String)> {
    if req.text.len() > MAX_TRANSCRIPT_BYTES {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Transcript exceeds {MAX_TRANSCRIPT_BYTES} bytes"),
        ));
    }

    let handle = state
        .pipeline
        .ingest(&req.text, req.metadata)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(handle)))
}

/// GET /api/transcripts?context_id= - List ingested transcript versions, newest first
pub async fn list_transcripts(
    State(state): State<AppState>,
    Query(query): Query<ListTranscriptsQuery>,
) -> Result<Json<Vec<TranscriptSummary>>, (StatusCode, String)> {
    let transcripts = state
        .pipeline
        .list_transcripts(query.context_id.as_deref())
        .await
        .map_err(error_response)?;
    Ok(Json(transcripts))
}

/// GET /api/transcripts/{context_id}/{name} - Reconstructed text of the newest version
pub async fn transcript_text(
    State(state): State<AppState>,
    Path((context_id, transcript_name)): Path<(String, String)>,
) -> Result<Json<TranscriptTextResponse>, (StatusCode, String)> {
    let text = state
        .pipeline
        .transcript_text(&context_id, &transcript_name)
        .await
        .map_err(error_response)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Transcript not found".to_string()))?;

    Ok(Json(TranscriptTextResponse {
        context_id,
        transcript_name,
        text,
    }))
}

/// GET /api/transcripts/{context_id}/{name}/sections - Report sections of the newest version
pub async fn transcript_sections(
    State(state): State<AppState>,
    Path((context_id, transcript_name)): Path<(String, String)>,
) -> Result<Json<ReportSections>, (StatusCode, String)> {
    let sections = state
        .pipeline
        .sections(&context_id, &transcript_name)
        .await
        .map_err(error_response)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Transcript not found".to_string()))?;
    Ok(Json(sections))
}

/// DELETE /api/contexts/{context_id} - Remove every chunk of a context
pub async fn delete_context(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> Result<Json<DeleteContextResponse>, (StatusCode, String)> {
    let deleted_chunks = state
        .pipeline
        .delete_context(&context_id)
        .await
        .map_err(error_response)?;

    Ok(Json(DeleteContextResponse {
        context_id,
        deleted_chunks,
    }))
}
