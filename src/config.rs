use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RagError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the persisted vector index lives
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Chat/completion provider configuration
    pub llm: LlmConfig,
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,
    /// Vector store configuration
    pub store: StoreConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub conversation: ConversationConfig,
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for chat completions
    pub chat_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Completion token cap per request
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "ollama" or "openai"
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Native dimension produced by the embedding model
    pub native_dim: usize,
    /// Texts sent per embedding request
    pub batch_size: usize,
    /// Attempts per item once a batch has been split up
    pub max_attempts: usize,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Dimension of stored vectors. `None` means "same as the embedding model".
    pub dimension: Option<usize>,
    /// Maximum total vector entries (0 = unlimited)
    pub max_entries: usize,
    /// Chunks written per upsert call during ingestion
    pub upsert_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Chunk length in characters
    pub size: usize,
    /// Characters shared between consecutive chunks
    pub overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Query variants per plan, the original included
    pub max_variants: usize,
    pub default_top_k: usize,
    /// Variants searched concurrently
    pub max_parallel: usize,
    /// Per-variant deadline in seconds
    pub variant_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub max_history: usize,
    pub timeout_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Character budget for transcript/context content in bounded mode
    pub context_chars: usize,
    /// Deadline for conversational replies
    pub fast_deadline_secs: u64,
    /// Deadline for deep-analysis requests
    pub deep_deadline_secs: u64,
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    /// Ask the LLM for a section report on every ingested transcript
    pub generate_report: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9000".to_string(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            conversation: ConversationConfig::default(),
            synthesis: SynthesisConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            api_key: None,
            max_tokens: 2048,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            native_dim: 768,
            batch_size: 32,
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimension: None,
            max_entries: 500_000,
            upsert_batch_size: 100,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: 1500,
            overlap: 200,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_variants: 3,
            default_top_k: 5,
            max_parallel: 4,
            variant_timeout_secs: 15,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: 10,
            timeout_minutes: 30,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            context_chars: 12_000,
            fast_deadline_secs: 90,
            deep_deadline_secs: 180,
            max_attempts: 3,
            base_delay_ms: 1000,
            generate_report: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("RAG_BIND_ADDR") {
            config.bind_addr = addr;
        }

        // Chat provider
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Some(v) = env_parse("LLM_MAX_TOKENS") {
            config.llm.max_tokens = v;
        }

        // Embedding provider
        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(url) = std::env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            config.embedding.api_key = Some(key);
        }
        if let Some(v) = env_parse("EMBEDDING_DIM") {
            config.embedding.native_dim = v;
        }
        if let Some(v) = env_parse("EMBEDDING_BATCH_SIZE") {
            config.embedding.batch_size = v;
        }
        if let Some(v) = env_parse("EMBEDDING_MAX_ATTEMPTS") {
            config.embedding.max_attempts = v;
        }
        if let Some(v) = env_parse("EMBEDDING_BASE_DELAY_MS") {
            config.embedding.base_delay_ms = v;
        }

        // Vector store
        if let Some(v) = env_parse("VECTOR_DIMENSION") {
            config.store.dimension = Some(v);
        }
        if let Some(v) = env_parse("VECTOR_MAX_ENTRIES") {
            config.store.max_entries = v;
        }
        if let Some(v) = env_parse("VECTOR_UPSERT_BATCH_SIZE") {
            config.store.upsert_batch_size = v;
        }

        if let Some(v) = env_parse("CHUNK_SIZE") {
            config.chunking.size = v;
        }
        if let Some(v) = env_parse("CHUNK_OVERLAP") {
            config.chunking.overlap = v;
        }

        if let Some(v) = env_parse("RETRIEVAL_MAX_VARIANTS") {
            config.retrieval.max_variants = v;
        }
        if let Some(v) = env_parse("RETRIEVAL_TOP_K") {
            config.retrieval.default_top_k = v;
        }
        if let Some(v) = env_parse("RETRIEVAL_MAX_PARALLEL") {
            config.retrieval.max_parallel = v;
        }
        if let Some(v) = env_parse("RETRIEVAL_VARIANT_TIMEOUT_SECS") {
            config.retrieval.variant_timeout_secs = v;
        }

        if let Some(v) = env_parse("CONVERSATION_MAX_HISTORY") {
            config.conversation.max_history = v;
        }
        if let Some(v) = env_parse("CONVERSATION_TIMEOUT_MINUTES") {
            config.conversation.timeout_minutes = v;
        }

        if let Some(v) = env_parse("SYNTHESIS_CONTEXT_CHARS") {
            config.synthesis.context_chars = v;
        }
        if let Some(v) = env_parse("SYNTHESIS_FAST_DEADLINE_SECS") {
            config.synthesis.fast_deadline_secs = v;
        }
        if let Some(v) = env_parse("SYNTHESIS_DEEP_DEADLINE_SECS") {
            config.synthesis.deep_deadline_secs = v;
        }
        if let Some(v) = env_parse("SYNTHESIS_MAX_ATTEMPTS") {
            config.synthesis.max_attempts = v;
        }
        if let Some(v) = env_parse("SYNTHESIS_BASE_DELAY_MS") {
            config.synthesis.base_delay_ms = v;
        }
        if let Some(v) = env_parse("RAG_GENERATE_REPORT") {
            config.synthesis.generate_report = v;
        }

        config
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.size == 0 {
            return Err(RagError::Validation("chunk size must be positive".into()));
        }
        if self.chunking.overlap >= self.chunking.size {
            return Err(RagError::Validation(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunking.overlap, self.chunking.size
            )));
        }
        if self.embedding.native_dim == 0 || self.store_dimension() == 0 {
            return Err(RagError::Validation("vector dimensions must be positive".into()));
        }
        if self.embedding.batch_size == 0 || self.store.upsert_batch_size == 0 {
            return Err(RagError::Validation("batch sizes must be positive".into()));
        }
        if self.conversation.max_history == 0 {
            return Err(RagError::Validation("max_history must be positive".into()));
        }
        if self.retrieval.max_variants == 0 || self.retrieval.max_parallel == 0 {
            return Err(RagError::Validation(
                "retrieval needs at least one variant and one worker".into(),
            ));
        }
        Ok(())
    }

    /// Dimension of vectors written to the store.
    pub fn store_dimension(&self) -> usize {
        self.store.dimension.unwrap_or(self.embedding.native_dim)
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn variant_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval.variant_timeout_secs)
    }

    pub fn fast_deadline(&self) -> Duration {
        Duration::from_secs(self.synthesis.fast_deadline_secs)
    }

    pub fn deep_deadline(&self) -> Duration {
        Duration::from_secs(self.synthesis.deep_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_store_dimension_defaults_to_native() {
        let config = Config::default();
        assert_eq!(config.store_dimension(), config.embedding.native_dim);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = Config::default();
        config.chunking.overlap = config.chunking.size;
        assert!(matches!(config.validate(), Err(RagError::Validation(_))));
    }

    #[test]
    fn test_retry_delays_read_from_env() {
        // Only this test sets these variables
        std::env::set_var("EMBEDDING_BASE_DELAY_MS", "25");
        std::env::set_var("SYNTHESIS_BASE_DELAY_MS", "40");
        let config = Config::from_env();
        std::env::remove_var("EMBEDDING_BASE_DELAY_MS");
        std::env::remove_var("SYNTHESIS_BASE_DELAY_MS");

        assert_eq!(config.embedding.base_delay_ms, 25);
        assert_eq!(config.synthesis.base_delay_ms, 40);
    }

    #[test]
    fn test_zero_history_rejected() {
        let mut config = Config::default();
        config.conversation.max_history = 0;
        assert!(config.validate().is_err());
    }
}
