use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::error_response;
use crate::models::{SearchRequest, SearchResponse};
use crate::state::AppState;

const MAX_TOP_K: usize = 50;

/// POST /api/search - Multi-query retrieval pipeline:
///   1. Query planning (classification + weighted variants)
///   2. Concurrent vector search per variant
///   3. Max-fusion, dedup by chunk, top_k
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }

    let top_k = req
        .top_k
        .unwrap_or(state.config.retrieval.default_top_k)
        .min(MAX_TOP_K);

    let (plan, retrieval) = state
        .pipeline
        .query(&query, &req.filter, Some(top_k), req.min_score)
        .await
        .map_err(error_response)?;

    if retrieval.failed_variants > 0 {
        tracing::warn!(
            "Search '{query}': {} of {} variants failed",
            retrieval.failed_variants,
            plan.variants.len()
        );
    }

    Ok(Json(SearchResponse {
        query,
        query_type: plan.query_type,
        variants: plan.variants,
        results: retrieval.results,
        no_context_found: retrieval.no_context_found,
    }))
}
