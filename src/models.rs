use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted transcript segment: the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `{transcript_id}_{chunk_index}`; stable across re-upserts of the same version
    pub id: String,
    pub transcript_id: Uuid,
    pub transcript_name: String,
    pub context_id: String,
    pub source_tag: String,
    pub text: String,
    /// Byte offset of the first character in the original transcript.
    pub offset_start: usize,
    /// Byte offset one past the last character.
    pub offset_end: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub section_tags: Vec<String>,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn make_id(transcript_id: Uuid, chunk_index: usize) -> String {
        format!("{transcript_id}_{chunk_index}")
    }
}

/// Metadata supplied with a document at ingest time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub transcript_name: String,
    pub context_id: String,
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
}

fn default_source_tag() -> String {
    "file".to_string()
}

/// Returned by ingest: identifies the transcript version that was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptHandle {
    pub transcript_id: Uuid,
    pub transcript_name: String,
    pub context_id: String,
    pub total_chunks: usize,
    pub stored_chunks: usize,
    /// Chunk indices whose embedding failed after retries
    pub failed_chunks: Vec<usize>,
    pub created_at: DateTime<Utc>,
}

/// One ingested transcript version, as listed from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSummary {
    pub transcript_id: Uuid,
    pub transcript_name: String,
    pub context_id: String,
    pub source_tag: String,
    pub total_chunks: usize,
    pub created_at: DateTime<Utc>,
}

/// Exact-match metadata filter; every populated field must match (AND).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkFilter {
    pub transcript_name: Option<String>,
    pub context_id: Option<String>,
}

impl ChunkFilter {
    pub fn context(context_id: &str) -> Self {
        Self {
            transcript_name: None,
            context_id: Some(context_id.to_string()),
        }
    }

    pub fn transcript(context_id: &str, transcript_name: &str) -> Self {
        Self {
            transcript_name: Some(transcript_name.to_string()),
            context_id: Some(context_id.to_string()),
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.transcript_name
            .as_deref()
            .is_none_or(|name| chunk.transcript_name == name)
            && self
                .context_id
                .as_deref()
                .is_none_or(|ctx| chunk.context_id == ctx)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Factual,
    Conceptual,
    Temporal,
    Exploratory,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Factual => "factual",
            QueryType::Conceptual => "conceptual",
            QueryType::Temporal => "temporal",
            QueryType::Exploratory => "exploratory",
        }
    }
}

/// A reformulation of the user query with its fusion weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryVariant {
    pub text: String,
    pub weight: f32,
}

/// Suggested retrieval parameters derived from the query shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SearchParams {
    pub top_k: usize,
    pub min_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub original_query: String,
    pub query_type: QueryType,
    /// Ordered, distinct, non-empty; the original query comes first with weight 1.0
    pub variants: Vec<QueryVariant>,
    pub keywords: Vec<String>,
    pub search_params: SearchParams,
}

/// A ranked chunk returned by the multi-query retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    /// Fused score: max over variants of raw similarity × variant weight
    pub score: f32,
    /// 1-based position in the result list
    pub rank: usize,
    pub chunk_index: usize,
    pub transcript_name: String,
    pub context_id: String,
    pub text: String,
    /// Variant that produced the winning fused score
    pub matched_variant: String,
}

/// Ranked results plus the signals callers need to degrade gracefully.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Retrieval {
    pub results: Vec<RetrievalResult>,
    /// True when nothing usable came back (empty store, or every variant failed)
    pub no_context_found: bool,
    pub failed_variants: usize,
}

/// A single chat turn sent to an LLM backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

// ─── HTTP request/response types ─────────────────────────

/// Ingest request
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
}

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    #[serde(default)]
    pub filter: ChunkFilter,
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub query_type: QueryType,
    pub variants: Vec<QueryVariant>,
    pub results: Vec<RetrievalResult>,
    pub no_context_found: bool,
}

/// Converse request
#[derive(Debug, Clone, Deserialize)]
pub struct ConverseRequest {
    pub context_id: String,
    pub message: String,
}

/// Converse response
#[derive(Debug, Clone, Serialize)]
pub struct ConverseResponse {
    pub reply: String,
}

/// Closer-look request
#[derive(Debug, Clone, Deserialize)]
pub struct CloserLookRequest {
    pub context_id: String,
    pub transcript_name: String,
    pub topic: String,
    /// Send the whole transcript instead of the bounded excerpt
    #[serde(default)]
    pub unbounded: bool,
}

/// Closer-look response
#[derive(Debug, Clone, Serialize)]
pub struct CloserLookResponse {
    pub transcript_name: String,
    pub analysis: String,
}

/// Query string of the transcript listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTranscriptsQuery {
    pub context_id: Option<String>,
}

/// Reconstructed transcript text
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptTextResponse {
    pub context_id: String,
    pub transcript_name: String,
    pub text: String,
}

/// Conversation history response
#[derive(Debug, Clone, Serialize)]
pub struct ContextHistoryResponse {
    pub context_id: String,
    pub messages: Vec<ChatMessage>,
}

/// Context deletion response
#[derive(Debug, Clone, Serialize)]
pub struct DeleteContextResponse {
    pub context_id: String,
    pub deleted_chunks: usize,
}
