use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use transcript_rag::api;
use transcript_rag::config::Config;
use transcript_rag::state::AppState;

/// Request bodies above this are rejected before reaching a handler.
const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);
    tracing::info!(
        "Embedding provider: {} ({})",
        config.embedding.provider,
        config.embedding.base_url
    );

    let state = AppState::new(config.clone())?;

    let app = Router::new()
        .route("/api/transcripts", post(api::transcripts::ingest))
        .route("/api/transcripts", get(api::transcripts::list_transcripts))
        .route(
            "/api/transcripts/{context_id}/{name}",
            get(api::transcripts::transcript_text),
        )
        .route(
            "/api/transcripts/{context_id}/{name}/sections",
            get(api::transcripts::transcript_sections),
        )
        .route("/api/contexts/{context_id}", delete(api::transcripts::delete_context))
        .route("/api/contexts/{context_id}/summary", get(api::chat::summary))
        .route("/api/contexts/{context_id}/history", get(api::chat::history))
        .route("/api/search", post(api::search::search))
        .route("/api/converse", post(api::chat::converse))
        .route("/api/closer-look", post(api::chat::closer_look))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
