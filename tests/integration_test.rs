//! Integration tests for the transcript RAG pipeline.
//!
//! These tests run ingestion, retrieval and conversation end to end against
//! deterministic in-process backends, so no embedding or LLM server is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use parking_lot::Mutex;

use transcript_rag::api;
use transcript_rag::config::Config;
use transcript_rag::error::{RagError, Result};
use transcript_rag::llm::{CompletionRequest, EmbeddingBackend, LlmBackend, SynthesisMode};
use transcript_rag::models::{ChunkFilter, ConverseRequest, DocumentMetadata, SearchRequest};
use transcript_rag::pipeline::RagPipeline;
use transcript_rag::search::vector::{LocalVectorStore, VectorIndex};
use transcript_rag::state::AppState;

const DIM: usize = 64;

// ─── Fake backends ───────────────────────────────────────

/// Bag-of-words embedder: every word adds 1.0 to a hashed bucket. Texts
/// containing "poison" are rejected as bad input.
struct BagEmbedder {
    dim: usize,
}

fn bucket(word: &str, dim: usize) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % dim as u64) as usize
}

fn bag_of_words(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        v[bucket(word, dim)] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingBackend for BagEmbedder {
    fn name(&self) -> &str {
        "bag-of-words"
    }

    fn native_dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| {
                if t.contains("poison") {
                    Err(RagError::RejectedInput("unsupported input".into()))
                } else {
                    Ok(bag_of_words(t, self.dim))
                }
            })
            .collect()
    }
}

const REPORT: &str = "\
Main Conversation Topics:
- Quarterly budget
Action Items:
- Dana sends the revised forecast
Decisions Made:
- Budget stays flat
";

/// Records every request; answers reports with a fixed report and
/// everything else with `reply N`.
#[derive(Default)]
struct RecordingLlm {
    requests: Mutex<Vec<CompletionRequest>>,
}

impl RecordingLlm {
    fn last_user_message(&self) -> String {
        self.requests
            .lock()
            .last()
            .and_then(|r| r.messages.last())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn last_system_prompt(&self) -> String {
        self.requests
            .lock()
            .last()
            .and_then(|r| r.messages.first())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmBackend for RecordingLlm {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let is_report = request
            .messages
            .first()
            .is_some_and(|m| m.content.starts_with("Summarise the transcript"));
        let mut requests = self.requests.lock();
        requests.push(request.clone());
        if is_report {
            Ok(REPORT.to_string())
        } else {
            Ok(format!("reply {}", requests.len()))
        }
    }
}

/// Holds the first call until a permit is added; later calls answer at once.
struct GatedLlm {
    calls: AtomicUsize,
    gate: tokio::sync::Semaphore,
}

#[async_trait]
impl LlmBackend for GatedLlm {
    fn name(&self) -> &str {
        "gated"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            self.gate
                .acquire()
                .await
                .map_err(|e| RagError::TransientProvider(e.to_string()))?
                .forget();
        }
        Ok(format!("reply {call}"))
    }
}

// ─── Helpers ─────────────────────────────────────────────

fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.native_dim = DIM;
    config.embedding.base_delay_ms = 1;
    config.synthesis.base_delay_ms = 1;
    config.chunking.size = 200;
    config.chunking.overlap = 20;
    config
}

fn pipeline(config: Config, llm: Arc<dyn LlmBackend>, index: Arc<dyn VectorIndex>) -> RagPipeline {
    let embedder = Arc::new(BagEmbedder {
        dim: config.embedding.native_dim,
    });
    match RagPipeline::new(config, embedder, llm, index) {
        Ok(p) => p,
        Err(e) => panic!("pipeline construction failed: {e}"),
    }
}

fn in_memory_pipeline(llm: Arc<dyn LlmBackend>) -> RagPipeline {
    pipeline(test_config(), llm, Arc::new(LocalVectorStore::in_memory(DIM, 0)))
}

fn meta(name: &str, context_id: &str) -> DocumentMetadata {
    DocumentMetadata {
        transcript_name: name.to_string(),
        context_id: context_id.to_string(),
        source_tag: "file".to_string(),
    }
}

const FINANCE: &str = "What did we decide about the budget? We decided the budget stays flat \
    for the quarter, and the forecast gets revised before the board meeting.";

const ENGINEERING: &str = "The deploy pipeline moved to kubernetes. Rollout of the new cluster \
    starts next sprint once the canary checks are green.";

/// A transcript long enough to span several chunks.
fn long_transcript() -> String {
    (1..=12)
        .map(|i| format!("Speaker {i}: item {i} of the standup covered release notes and testing. "))
        .collect()
}

// ─── Ingestion + query ───────────────────────────────────

#[tokio::test]
async fn test_ingest_then_query_ranks_relevant_transcript_first() {
    let p = in_memory_pipeline(Arc::new(RecordingLlm::default()));
    p.ingest(FINANCE, meta("finance", "42")).await.unwrap();
    p.ingest(ENGINEERING, meta("engineering", "42")).await.unwrap();

    let (plan, retrieval) = p
        .query("budget forecast", &ChunkFilter::context("42"), Some(5), None)
        .await
        .unwrap();

    assert_eq!(plan.variants[0].text, "budget forecast");
    assert!(!retrieval.no_context_found);
    assert_eq!(retrieval.results[0].transcript_name, "finance");
    assert!(retrieval.results.len() <= 5);

    // Ranks from 1, scores non-increasing, no duplicate chunks
    for (i, window) in retrieval.results.windows(2).enumerate() {
        assert!(window[0].score >= window[1].score);
        assert_eq!(window[0].rank, i + 1);
    }
    let mut ids: Vec<&str> = retrieval.results.iter().map(|r| r.chunk_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), retrieval.results.len());
}

#[tokio::test]
async fn test_query_filter_scopes_to_context() {
    let p = in_memory_pipeline(Arc::new(RecordingLlm::default()));
    p.ingest(FINANCE, meta("finance", "a")).await.unwrap();
    p.ingest(FINANCE, meta("finance", "b")).await.unwrap();

    let (_, retrieval) = p
        .query("budget", &ChunkFilter::context("b"), Some(10), None)
        .await
        .unwrap();

    assert!(!retrieval.results.is_empty());
    assert!(retrieval.results.iter().all(|r| r.context_id == "b"));
}

#[tokio::test]
async fn test_query_on_empty_store_signals_no_context() {
    let p = in_memory_pipeline(Arc::new(RecordingLlm::default()));
    let (_, retrieval) = p
        .query("anything at all", &ChunkFilter::default(), None, None)
        .await
        .unwrap();
    assert!(retrieval.results.is_empty());
    assert!(retrieval.no_context_found);
}

#[tokio::test]
async fn test_ingest_rejects_empty_input() {
    let p = in_memory_pipeline(Arc::new(RecordingLlm::default()));
    let empty_text = p.ingest("   ", meta("finance", "42")).await;
    assert!(matches!(empty_text, Err(RagError::Validation(_))));
    let empty_name = p.ingest(FINANCE, meta(" ", "42")).await;
    assert!(matches!(empty_name, Err(RagError::Validation(_))));
}

#[tokio::test]
async fn test_failed_chunk_is_skipped_not_fatal() {
    let mut config = test_config();
    config.chunking.size = 20;
    config.chunking.overlap = 0;
    let p = pipeline(
        config,
        Arc::new(RecordingLlm::default()),
        Arc::new(LocalVectorStore::in_memory(DIM, 0)),
    );

    let text: String = ["budget review", "poison entry", "hiring plan"]
        .iter()
        .map(|part| format!("{part:<20}"))
        .collect();
    let handle = p.ingest(&text, meta("standup", "42")).await.unwrap();

    assert_eq!(handle.total_chunks, 3);
    assert_eq!(handle.stored_chunks, 2);
    assert_eq!(handle.failed_chunks, vec![1]);

    let rebuilt = p.transcript_text("42", "standup").await.unwrap().unwrap();
    assert!(rebuilt.starts_with("budget review"));
    assert!(rebuilt.contains("[...]"));
    assert!(rebuilt.contains("hiring plan"));
}

#[tokio::test]
async fn test_ingest_fails_when_nothing_is_embedded() {
    let p = in_memory_pipeline(Arc::new(RecordingLlm::default()));
    let result = p.ingest("poison only", meta("bad", "42")).await;
    assert!(matches!(result, Err(RagError::PermanentProvider(_))));
}

// ─── Transcript reads ────────────────────────────────────

#[tokio::test]
async fn test_transcript_text_list_and_delete() {
    let p = in_memory_pipeline(Arc::new(RecordingLlm::default()));
    let original = long_transcript();
    let first = p.ingest(&original, meta("standup", "42")).await.unwrap();
    assert!(first.total_chunks > 1);
    assert_eq!(
        p.transcript_text("42", "standup").await.unwrap().as_deref(),
        Some(original.as_str())
    );

    // A second ingest of the same name is a new version, read back in preference
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = p.ingest(ENGINEERING, meta("standup", "42")).await.unwrap();
    assert_ne!(first.transcript_id, second.transcript_id);
    assert_eq!(
        p.transcript_text("42", "standup").await.unwrap().as_deref(),
        Some(ENGINEERING)
    );

    let listed = p.list_transcripts(Some("42")).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].transcript_id, second.transcript_id);
    assert!(p.list_transcripts(Some("other")).await.unwrap().is_empty());

    let deleted = p.delete_context("42").await.unwrap();
    assert_eq!(deleted, first.stored_chunks + second.stored_chunks);
    assert!(p.list_transcripts(Some("42")).await.unwrap().is_empty());
    assert!(p.transcript_text("42", "standup").await.unwrap().is_none());
}

#[tokio::test]
async fn test_report_sections_stored_when_enabled() {
    let mut config = test_config();
    config.synthesis.generate_report = true;
    let p = pipeline(
        config,
        Arc::new(RecordingLlm::default()),
        Arc::new(LocalVectorStore::in_memory(DIM, 0)),
    );

    p.ingest(FINANCE, meta("finance", "42")).await.unwrap();
    let sections = p.sections("42", "finance").await.unwrap().unwrap();
    assert_eq!(sections.action_items, vec!["Dana sends the revised forecast"]);
    assert_eq!(sections.decisions_made, vec!["Budget stays flat"]);
    assert!(p.sections("42", "missing").await.unwrap().is_none());
}

// ─── Dimension handling ──────────────────────────────────

#[tokio::test]
async fn test_padding_writes_store_dimension_vectors() {
    let mut config = test_config();
    config.store.dimension = Some(DIM * 2);
    let store = Arc::new(LocalVectorStore::in_memory(DIM * 2, 0));
    let p = pipeline(config, Arc::new(RecordingLlm::default()), store.clone());

    p.ingest(FINANCE, meta("finance", "42")).await.unwrap();

    let stored = store.fetch(&ChunkFilter::default()).await.unwrap();
    assert!(!stored.is_empty());
    let native = bag_of_words(&stored[0].text, DIM);
    assert_eq!(stored[0].embedding.len(), DIM * 2);
    assert_eq!(&stored[0].embedding[..DIM], native.as_slice());
    assert!(stored[0].embedding[DIM..].iter().all(|&x| x == 0.0));

    // Queries are padded the same way, so retrieval still works
    let (_, retrieval) = p
        .query("budget forecast", &ChunkFilter::context("42"), Some(3), None)
        .await
        .unwrap();
    assert_eq!(retrieval.results[0].transcript_name, "finance");
}

#[tokio::test]
async fn test_native_dimension_above_store_fails_at_startup() {
    let embedder = Arc::new(BagEmbedder { dim: DIM });
    let result = RagPipeline::new(
        test_config(),
        embedder,
        Arc::new(RecordingLlm::default()),
        Arc::new(LocalVectorStore::in_memory(DIM / 2, 0)),
    );
    assert!(matches!(
        result,
        Err(RagError::DimensionMismatch { native: 64, store: 32 })
    ));
}

// ─── Persistence ─────────────────────────────────────────

#[tokio::test]
async fn test_index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let original = long_transcript();

    {
        let store = LocalVectorStore::open_or_create(dir.path(), DIM, 0).unwrap();
        let p = pipeline(test_config(), Arc::new(RecordingLlm::default()), Arc::new(store));
        p.ingest(&original, meta("standup", "42")).await.unwrap();
    }

    let store = LocalVectorStore::open_or_create(dir.path(), DIM, 0).unwrap();
    let p = pipeline(test_config(), Arc::new(RecordingLlm::default()), Arc::new(store));

    assert_eq!(p.list_transcripts(None).await.unwrap().len(), 1);
    assert_eq!(
        p.transcript_text("42", "standup").await.unwrap().as_deref(),
        Some(original.as_str())
    );
}

#[tokio::test]
async fn test_reopen_with_other_dimension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = LocalVectorStore::open_or_create(dir.path(), DIM, 0).unwrap();
        let p = pipeline(test_config(), Arc::new(RecordingLlm::default()), Arc::new(store));
        p.ingest(FINANCE, meta("finance", "42")).await.unwrap();
    }
    assert!(LocalVectorStore::open_or_create(dir.path(), DIM * 2, 0).is_err());
}

// ─── Conversation ────────────────────────────────────────

#[tokio::test]
async fn test_converse_question_goes_through_retrieval() {
    let llm = Arc::new(RecordingLlm::default());
    let p = in_memory_pipeline(llm.clone());
    p.ingest(FINANCE, meta("finance", "42")).await.unwrap();

    let reply = p
        .converse("42", "what did we decide about the budget?")
        .await
        .unwrap();
    assert_eq!(reply, "reply 1");

    let prompt = llm.last_user_message();
    assert!(prompt.contains("Here are excerpts from the transcripts"));
    assert!(prompt.contains("finance"));
    assert!(prompt.ends_with("what did we decide about the budget?"));

    let summary = p.summary("42");
    assert_eq!(summary.message_count, 2);
    assert!(summary.active_topics.contains(&"finance".to_string()));
}

#[tokio::test]
async fn test_converse_acknowledgement_skips_retrieval() {
    let llm = Arc::new(RecordingLlm::default());
    let p = in_memory_pipeline(llm.clone());
    p.ingest(FINANCE, meta("finance", "42")).await.unwrap();

    p.converse("42", "thanks, that's clear").await.unwrap();

    assert!(!llm.last_user_message().contains("Here are excerpts"));
    assert!(!llm.last_system_prompt().contains("excerpts"));
}

#[tokio::test]
async fn test_converse_without_matches_still_replies() {
    let llm = Arc::new(RecordingLlm::default());
    let p = in_memory_pipeline(llm.clone());

    let reply = p.converse("42", "who owns the budget?").await.unwrap();
    assert_eq!(reply, "reply 1");
    assert!(llm
        .last_user_message()
        .contains("No relevant transcript excerpts were found"));
}

#[tokio::test]
async fn test_converse_history_is_carried_between_turns() {
    let llm = Arc::new(RecordingLlm::default());
    let p = in_memory_pipeline(llm.clone());

    p.converse("42", "I will be out on friday").await.unwrap();
    p.converse("42", "I am back on monday").await.unwrap();

    let requests = llm.requests.lock();
    let last = &requests[1].messages;
    // system, user, assistant, user
    assert_eq!(last.len(), 4);
    assert_eq!(last[1].content, "I will be out on friday");
    assert_eq!(last[2].content, "reply 1");
    assert_eq!(p.summary("42").message_count, 4);
    assert_eq!(p.summary("other").message_count, 0);

    let history: Vec<String> = p.history("42").into_iter().map(|m| m.content).collect();
    assert_eq!(
        history,
        ["I will be out on friday", "reply 1", "I am back on monday", "reply 2"]
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
    );
    assert!(p.history("other").is_empty());
}

#[tokio::test]
async fn test_stale_reply_is_discarded_when_newer_message_wins() {
    let llm = Arc::new(GatedLlm {
        calls: AtomicUsize::new(0),
        gate: tokio::sync::Semaphore::new(0),
    });
    let p = Arc::new(in_memory_pipeline(llm.clone()));

    let first = {
        let p = p.clone();
        tokio::spawn(async move { p.converse("42", "I will be out on friday").await })
    };
    while llm.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let second = p.converse("42", "I am back on monday").await.unwrap();
    assert_eq!(second, "reply 1");

    llm.gate.add_permits(1);
    let first = first.await.unwrap();
    assert!(matches!(first, Err(RagError::Superseded(_))));

    // user, user, reply to the second message; the stale reply never landed
    assert_eq!(p.summary("42").message_count, 3);
}

#[tokio::test]
async fn test_closer_look_reads_whole_transcript() {
    let llm = Arc::new(RecordingLlm::default());
    let p = in_memory_pipeline(llm.clone());
    let original = long_transcript();
    p.ingest(&original, meta("standup", "42")).await.unwrap();

    let analysis = p
        .closer_look("42", "standup", "release notes", SynthesisMode::Unbounded)
        .await
        .unwrap();
    assert_eq!(analysis, "reply 1");

    let prompt = llm.last_user_message();
    assert!(prompt.contains(&original));
    assert!(prompt.ends_with("Take a closer look at: release notes"));

    let missing = p
        .closer_look("42", "retro", "anything", SynthesisMode::Bounded)
        .await;
    assert!(matches!(missing, Err(RagError::Validation(_))));
}

// ─── HTTP handlers ───────────────────────────────────────

#[tokio::test]
async fn test_handlers_map_errors_to_status_codes() {
    let state = AppState::with_pipeline(
        test_config(),
        in_memory_pipeline(Arc::new(RecordingLlm::default())),
    );

    let empty_query = api::search::search(
        State(state.clone()),
        Json(SearchRequest {
            query: "  ".to_string(),
            top_k: None,
            min_score: None,
            filter: ChunkFilter::default(),
        }),
    )
    .await;
    assert!(matches!(empty_query, Err((StatusCode::BAD_REQUEST, _))));

    let missing = api::transcripts::transcript_text(
        State(state.clone()),
        Path(("42".to_string(), "retro".to_string())),
    )
    .await;
    assert!(matches!(missing, Err((StatusCode::NOT_FOUND, _))));

    let reply = api::chat::converse(
        State(state.clone()),
        Json(ConverseRequest {
            context_id: "42".to_string(),
            message: "I will be out on friday".to_string(),
        }),
    )
    .await;
    match reply {
        Ok(Json(body)) => assert_eq!(body.reply, "reply 1"),
        Err((status, message)) => panic!("converse failed: {status} {message}"),
    }

    let Json(history) = api::chat::history(State(state), Path("42".to_string())).await;
    assert_eq!(history.context_id, "42");
    assert_eq!(history.messages.len(), 2);
    assert_eq!(history.messages[1].role, "assistant");
}
