//! The three operations exposed to the host: `ingest`, `query` and
//! `converse`, plus the transcript reads and deep analysis built on them.
//!
//! [`RagPipeline`] is constructed once at startup from the configured
//! backends and index. Construction is where configuration errors such as a
//! dimension mismatch surface; after that every failure is per-request.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chunking;
use crate::chunking::sections::{self, ReportSections};
use crate::config::Config;
use crate::conversation::intent;
use crate::conversation::session::{ContextSummary, ConversationManager, SessionStore};
use crate::error::{RagError, Result};
use crate::llm::adapter::EmbeddingAdapter;
use crate::llm::retry::RetryPolicy;
use crate::llm::synthesis::ResponseSynthesizer;
use crate::llm::{EmbeddingBackend, LlmBackend, SynthesisMode};
use crate::models::{
    ChatMessage, Chunk, ChunkFilter, DocumentMetadata, QueryPlan, Retrieval, RetrievalResult,
    TranscriptHandle, TranscriptSummary,
};
use crate::search::gateway::VectorGateway;
use crate::search::query_plan::QueryOptimizer;
use crate::search::retriever::MultiQueryRetriever;
use crate::search::vector::VectorIndex;

/// Keywords of a retrieval turn remembered as active topics.
const TOPIC_KEYWORDS: usize = 3;
/// Transcript names of the best hits remembered as active topics.
const TOPIC_TRANSCRIPTS: usize = 2;

pub struct RagPipeline {
    config: Config,
    embedder: Arc<EmbeddingAdapter>,
    gateway: Arc<VectorGateway>,
    optimizer: QueryOptimizer,
    retriever: MultiQueryRetriever,
    synthesizer: ResponseSynthesizer,
    conversations: ConversationManager,
}

impl RagPipeline {
    pub fn new(
        config: Config,
        embedding: Arc<dyn EmbeddingBackend>,
        llm: Arc<dyn LlmBackend>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        config.validate()?;

        let gateway = Arc::new(VectorGateway::new(index, config.store.upsert_batch_size));
        let embedder = Arc::new(EmbeddingAdapter::new(
            embedding,
            gateway.dimension(),
            config.embedding.batch_size,
            RetryPolicy::new(
                config.embedding.max_attempts,
                Duration::from_millis(config.embedding.base_delay_ms),
            ),
        )?);

        let retriever = MultiQueryRetriever::new(
            embedder.clone(),
            gateway.clone(),
            config.retrieval.max_parallel,
            config.variant_timeout(),
        );
        let synthesizer = ResponseSynthesizer::new(
            llm,
            RetryPolicy::new(
                config.synthesis.max_attempts,
                Duration::from_millis(config.synthesis.base_delay_ms),
            ),
            config.synthesis.context_chars,
            config.llm.max_tokens,
        );
        let conversations = ConversationManager::new(
            Arc::new(SessionStore::new()),
            config.conversation.max_history,
            config.conversation.timeout_minutes,
        );

        Ok(Self {
            optimizer: QueryOptimizer::new(config.retrieval.max_variants),
            config,
            embedder,
            gateway,
            retriever,
            synthesizer,
            conversations,
        })
    }

    // ─── Ingestion ───────────────────────────────────────

    /// Chunk, embed and store a transcript as a new version.
    ///
    /// Chunks whose embedding fails after retries are skipped and reported in
    /// the handle; the call only fails when nothing could be stored.
    pub async fn ingest(&self, text: &str, metadata: DocumentMetadata) -> Result<TranscriptHandle> {
        // ── Step 1: Validate ──────────────────────────────
        let transcript_name = metadata.transcript_name.trim().to_string();
        let context_id = metadata.context_id.trim().to_string();
        if transcript_name.is_empty() {
            return Err(RagError::Validation("transcript_name is required".into()));
        }
        if context_id.is_empty() {
            return Err(RagError::Validation("context_id is required".into()));
        }
        if text.trim().is_empty() {
            return Err(RagError::Validation(format!(
                "transcript '{transcript_name}' is empty"
            )));
        }

        // ── Step 2: Chunk ─────────────────────────────────
        let drafts = chunking::split(text, self.config.chunking.size, self.config.chunking.overlap)?;
        let total_chunks = drafts.len();
        tracing::info!("Ingesting '{transcript_name}' for context {context_id}: {total_chunks} chunks");

        // ── Step 3: Optional report sections ──────────────
        let section_tags = if self.config.synthesis.generate_report {
            self.report_tags(&transcript_name, text).await
        } else {
            Vec::new()
        };

        // ── Step 4: Embed ─────────────────────────────────
        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let embedded = self.embedder.embed(&texts).await;
        if !embedded.failed.is_empty() {
            tracing::warn!(
                "'{transcript_name}': {} of {total_chunks} chunks could not be embedded and were skipped",
                embedded.failed.len()
            );
        }

        // ── Step 5: Store ─────────────────────────────────
        let transcript_id = Uuid::new_v4();
        let created_at = Utc::now();
        let chunks: Vec<Chunk> = embedded
            .vectors
            .into_iter()
            .filter_map(|(index, embedding)| {
                let draft = drafts.get(index)?;
                Some(Chunk {
                    id: Chunk::make_id(transcript_id, draft.chunk_index),
                    transcript_id,
                    transcript_name: transcript_name.clone(),
                    context_id: context_id.clone(),
                    source_tag: metadata.source_tag.clone(),
                    text: draft.text.clone(),
                    offset_start: draft.offset_start,
                    offset_end: draft.offset_end,
                    chunk_index: draft.chunk_index,
                    total_chunks: draft.total_chunks,
                    section_tags: section_tags.clone(),
                    embedding,
                    created_at,
                })
            })
            .collect();

        if chunks.is_empty() {
            return Err(RagError::PermanentProvider(format!(
                "no chunk of '{transcript_name}' could be embedded"
            )));
        }
        let stored_chunks = self.gateway.upsert(chunks).await?;
        tracing::info!("Stored {stored_chunks}/{total_chunks} chunks of '{transcript_name}'");

        Ok(TranscriptHandle {
            transcript_id,
            transcript_name,
            context_id,
            total_chunks,
            stored_chunks,
            failed_chunks: embedded.failed,
            created_at,
        })
    }

    async fn report_tags(&self, transcript_name: &str, text: &str) -> Vec<String> {
        match self
            .synthesizer
            .generate_report(text, self.config.deep_deadline())
            .await
        {
            Ok(report) => sections::parse_report(&report).to_tags(),
            Err(e) => {
                tracing::warn!("Report for '{transcript_name}' failed, storing without sections: {e}");
                Vec::new()
            }
        }
    }

    // ─── Retrieval ───────────────────────────────────────

    /// Plan `text` and retrieve ranked chunks matching `filter`.
    ///
    /// `top_k` defaults to the configured value. Results below `min_score`
    /// are dropped when one is given.
    pub async fn query(
        &self,
        text: &str,
        filter: &ChunkFilter,
        top_k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<(QueryPlan, Retrieval)> {
        let plan = self.optimizer.plan(text)?;
        let top_k = top_k.unwrap_or(self.config.retrieval.default_top_k);
        tracing::info!(
            "Query '{}' planned as {} with {} variants",
            plan.original_query,
            plan.query_type.as_str(),
            plan.variants.len()
        );
        let retrieval = self.retriever.retrieve(&plan, filter, top_k, min_score).await;
        Ok((plan, retrieval))
    }

    // ─── Conversation ────────────────────────────────────

    /// Answer `message` in the conversation of `context_id`.
    ///
    /// Fails with [`RagError::Superseded`] when a newer message for the same
    /// context was accepted while this turn was in flight; the stale reply is
    /// never added to history.
    pub async fn converse(&self, context_id: &str, message: &str) -> Result<String> {
        let context_id = context_id.trim();
        let message = message.trim();
        if context_id.is_empty() {
            return Err(RagError::Validation("context_id is required".into()));
        }
        if message.is_empty() {
            return Err(RagError::Validation("message is required".into()));
        }

        // ── Step 1: Accept the message ────────────────────
        let ticket = self.conversations.begin_turn(context_id, message);

        // ── Step 2: Retrieve if the message needs it ──────
        let decision = intent::decide(message, ticket.prior(), &ticket.active_topics);
        let retrieved: Option<Vec<RetrievalResult>> = match decision.query {
            Some(query) if decision.needed => {
                let plan = self.optimizer.plan(&query)?;
                let retrieval = self
                    .retriever
                    .retrieve(
                        &plan,
                        &ChunkFilter::context(context_id),
                        plan.search_params.top_k,
                        Some(plan.search_params.min_score),
                    )
                    .await;
                if retrieval.no_context_found {
                    tracing::info!("No transcript context found for '{query}' in {context_id}");
                }
                self.conversations
                    .set_active_topics(&ticket, &active_topics(&plan, &retrieval.results));
                Some(retrieval.results)
            }
            _ => {
                tracing::debug!("Answering from history only in {context_id}");
                None
            }
        };

        // ── Step 3: Drop the turn if a newer one arrived ──
        if !self.conversations.is_current(&ticket) {
            tracing::debug!("Turn {} in {context_id} superseded before synthesis", ticket.turn);
            return Err(RagError::Superseded(context_id.to_string()));
        }

        // ── Step 4: Synthesize ────────────────────────────
        let reply = self
            .synthesizer
            .synthesize(
                &ticket.history,
                retrieved.as_deref(),
                SynthesisMode::Bounded,
                self.config.fast_deadline(),
            )
            .await;

        // ── Step 5: Record the reply ──────────────────────
        if !self.conversations.complete_turn(&ticket, &reply) {
            return Err(RagError::Superseded(context_id.to_string()));
        }
        Ok(reply)
    }

    pub fn summary(&self, context_id: &str) -> ContextSummary {
        self.conversations.summary(context_id)
    }

    /// Messages of the active session, oldest first.
    pub fn history(&self, context_id: &str) -> Vec<ChatMessage> {
        self.conversations.history(context_id)
    }

    // ─── Transcripts ─────────────────────────────────────

    /// In-depth answer about `topic` over the newest version of a transcript.
    pub async fn closer_look(
        &self,
        context_id: &str,
        transcript_name: &str,
        topic: &str,
        mode: SynthesisMode,
    ) -> Result<String> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(RagError::Validation("topic is required".into()));
        }
        let text = self
            .gateway
            .transcript_text(context_id, transcript_name)
            .await?
            .ok_or_else(|| {
                RagError::Validation(format!(
                    "transcript '{transcript_name}' not found in context {context_id}"
                ))
            })?;

        if mode == SynthesisMode::Unbounded {
            tracing::warn!("Closer look at '{transcript_name}' without truncation");
        }
        Ok(self
            .synthesizer
            .closer_look(transcript_name, &text, topic, mode, self.config.deep_deadline())
            .await)
    }

    pub async fn list_transcripts(&self, context_id: Option<&str>) -> Result<Vec<TranscriptSummary>> {
        self.gateway.list_transcripts(context_id).await
    }

    pub async fn transcript_text(
        &self,
        context_id: &str,
        transcript_name: &str,
    ) -> Result<Option<String>> {
        self.gateway.transcript_text(context_id, transcript_name).await
    }

    pub async fn sections(
        &self,
        context_id: &str,
        transcript_name: &str,
    ) -> Result<Option<ReportSections>> {
        self.gateway.sections(context_id, transcript_name).await
    }

    pub async fn delete_context(&self, context_id: &str) -> Result<usize> {
        self.gateway.delete_context(context_id).await
    }
}

/// Leading keywords of the plan plus the transcripts the best hits came from.
fn active_topics(plan: &QueryPlan, results: &[RetrievalResult]) -> Vec<String> {
    let mut topics: Vec<String> = plan.keywords.iter().take(TOPIC_KEYWORDS).cloned().collect();
    let mut names: Vec<&str> = Vec::new();
    for result in results {
        if names.len() == TOPIC_TRANSCRIPTS {
            break;
        }
        if !names.contains(&result.transcript_name.as_str()) {
            names.push(&result.transcript_name);
        }
    }
    topics.extend(names.into_iter().map(str::to_string));
    topics
}
