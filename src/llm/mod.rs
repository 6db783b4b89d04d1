//! Embedding and completion backends behind capability traits.
//!
//! Concrete vendors live in [`embeddings`] and [`completion`]; which one runs
//! is decided once at startup by the strategy maps in [`providers`].

pub mod adapter;
pub mod completion;
pub mod embeddings;
pub mod providers;
pub mod retry;
pub mod synthesis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::models::ChatMessage;

/// Turns texts into vectors of the backend's native dimension.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    fn native_dimension(&self) -> usize;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Generates text from a list of chat messages.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Truncation policy for content placed in a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Truncate transcript/context content to the configured budget.
    #[default]
    Bounded,
    /// No truncation; the caller accepts cost and backend-limit risk.
    Unbounded,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub mode: SynthesisMode,
    /// Upper bound for a single backend call.
    pub deadline: Duration,
}
