use std::sync::Arc;

use crate::config::Config;
use crate::llm::providers;
use crate::pipeline::RagPipeline;
use crate::search::vector::LocalVectorStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<RagPipeline>,
    pub synthesis_semaphore: Arc<tokio::sync::Semaphore>,
}

/// LLM-backed requests served at once; the rest wait for a permit.
const MAX_CONCURRENT_SYNTHESIS: usize = 3;

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        // Ensure data directories exist
        std::fs::create_dir_all(config.vector_dir())?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let embedding = providers::embedding_backend(http_client.clone(), &config.embedding)?;
        let llm = providers::llm_backend(http_client, &config.llm)?;
        tracing::info!(
            "Embedding backend: {} ({}-d), store dimension {}",
            embedding.name(),
            embedding.native_dimension(),
            config.store_dimension()
        );

        let index = LocalVectorStore::open_or_create(
            &config.vector_dir(),
            config.store_dimension(),
            config.store.max_entries,
        )?;

        let pipeline = RagPipeline::new(config.clone(), embedding, llm, Arc::new(index))?;

        Ok(Self::with_pipeline(config, pipeline))
    }

    /// State around an already-built pipeline.
    pub fn with_pipeline(config: Config, pipeline: RagPipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
            synthesis_semaphore: Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_SYNTHESIS)),
        }
    }
}
