use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::llm::EmbeddingBackend;

/// Maximum characters to send per text to the embedding API.
/// nomic-embed-text has an 8 192-token context; transcript prose tokenises at
/// roughly 1 token per 4 chars, so 6 000 chars stays well below it.
const MAX_EMBED_CHARS: usize = 6_000;

const EMBED_TIMEOUT: Duration = Duration::from_secs(60);

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    // Find the last char boundary at or before the limit
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn truncate_all(texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .map(|t| truncate_for_embedding(t).to_string())
        .collect()
}

fn check_count(provider: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(RagError::TransientProvider(format!(
            "{provider} returned {got} embeddings for {expected} inputs"
        )));
    }
    Ok(())
}

// ─── Ollama ──────────────────────────────────────────────

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(client: reqwest::Client, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.native_dim,
        }
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to silently truncate inputs that exceed the model's context
    /// length instead of returning a 400 error.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn native_dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let req = OllamaEmbedRequest {
            model: self.model.clone(),
            input: truncate_all(texts),
            truncate: true,
        };

        let resp = self
            .client
            .post(&url)
            .timeout(EMBED_TIMEOUT)
            .json(&req)
            .send()
            .await
            .map_err(|e| RagError::from_transport("Ollama embed API", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RagError::from_status("Ollama embed API", status, &body));
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .map_err(|e| RagError::from_transport("Ollama embed API", e))?;

        check_count("Ollama", texts.len(), body.embeddings.len())?;
        Ok(body.embeddings)
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: reqwest::Client, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            dimension: config.native_dim,
        }
    }
}

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn native_dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let req = OpenAiEmbedRequest {
            model: self.model.clone(),
            input: truncate_all(texts),
        };

        let resp = self
            .client
            .post(&url)
            .timeout(EMBED_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .map_err(|e| RagError::from_transport("OpenAI embed API", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RagError::from_status("OpenAI embed API", status, &body));
        }

        let body: OpenAiEmbedResponse = resp
            .json()
            .await
            .map_err(|e| RagError::from_transport("OpenAI embed API", e))?;

        check_count("OpenAI", texts.len(), body.data.len())?;

        // Order by index to keep results parallel with inputs
        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}
