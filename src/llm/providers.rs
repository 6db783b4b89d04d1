//! Backend selection: one strategy map per capability, keyed by the
//! provider name from configuration and consulted once at startup.

use std::sync::Arc;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{RagError, Result};
use crate::llm::completion::{OllamaChat, OpenAiChat};
use crate::llm::embeddings::{OllamaEmbedder, OpenAiEmbedder};
use crate::llm::{EmbeddingBackend, LlmBackend};

type EmbeddingFactory = fn(reqwest::Client, &EmbeddingConfig) -> Arc<dyn EmbeddingBackend>;
type LlmFactory = fn(reqwest::Client, &LlmConfig) -> Arc<dyn LlmBackend>;

fn ollama_embedder(client: reqwest::Client, config: &EmbeddingConfig) -> Arc<dyn EmbeddingBackend> {
    Arc::new(OllamaEmbedder::new(client, config))
}

fn openai_embedder(client: reqwest::Client, config: &EmbeddingConfig) -> Arc<dyn EmbeddingBackend> {
    Arc::new(OpenAiEmbedder::new(client, config))
}

fn ollama_chat(client: reqwest::Client, config: &LlmConfig) -> Arc<dyn LlmBackend> {
    Arc::new(OllamaChat::new(client, config))
}

fn openai_chat(client: reqwest::Client, config: &LlmConfig) -> Arc<dyn LlmBackend> {
    Arc::new(OpenAiChat::new(client, config))
}

const EMBEDDING_PROVIDERS: &[(&str, EmbeddingFactory)] = &[
    ("ollama", ollama_embedder as EmbeddingFactory),
    ("openai", openai_embedder as EmbeddingFactory),
];

// OpenRouter and DeepSeek speak the OpenAI chat protocol
const LLM_PROVIDERS: &[(&str, LlmFactory)] = &[
    ("ollama", ollama_chat as LlmFactory),
    ("openai", openai_chat as LlmFactory),
    ("openrouter", openai_chat as LlmFactory),
    ("deepseek", openai_chat as LlmFactory),
];

fn lookup<F: Copy>(map: &[(&str, F)], name: &str) -> Option<F> {
    let name = name.trim().to_lowercase();
    map.iter().find(|(key, _)| *key == name).map(|(_, f)| *f)
}

fn known(map: &[(&str, impl Copy)]) -> String {
    map.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(", ")
}

pub fn embedding_backend(
    client: reqwest::Client,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingBackend>> {
    let factory = lookup(EMBEDDING_PROVIDERS, &config.provider).ok_or_else(|| {
        RagError::Validation(format!(
            "unknown embedding provider '{}' (available: {})",
            config.provider,
            known(EMBEDDING_PROVIDERS)
        ))
    })?;
    Ok(factory(client, config))
}

pub fn llm_backend(client: reqwest::Client, config: &LlmConfig) -> Result<Arc<dyn LlmBackend>> {
    let factory = lookup(LLM_PROVIDERS, &config.provider).ok_or_else(|| {
        RagError::Validation(format!(
            "unknown LLM provider '{}' (available: {})",
            config.provider,
            known(LLM_PROVIDERS)
        ))
    })?;
    Ok(factory(client, config))
}
