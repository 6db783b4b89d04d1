//! # transcript-rag
//!
//! A transcript knowledge base: long free-text transcripts are chunked,
//! embedded and stored in a persistent vector index, then answered from with
//! retrieval-augmented generation over short-lived conversations.
//!
//! ## Architecture
//!
//! Ingestion and conversation share the vector store:
//!
//! ```text
//!   Ingest                                  Converse
//!   ──────                                  ────────
//!  ┌──────────────┐                       ┌──────────────────┐
//!  │  Transcript  │                       │ Message (ctx id) │
//!  └──────┬───────┘                       └────────┬─────────┘
//!         ▼                                        ▼
//!  ┌──────────────┐                       ┌──────────────────┐
//!  │   Chunker    │                       │  Conversation    │
//!  │ size/overlap │                       │  Manager + need  │
//!  └──────┬───────┘                       │   heuristic      │
//!         ▼                               └───┬──────────┬───┘
//!  ┌──────────────┐                 retrieval │          │ history only
//!  │  Embedding   │                           ▼          │
//!  │   Adapter    │◄──────────────┐   ┌──────────────┐   │
//!  │ batch, retry │               │   │    Query     │   │
//!  │  zero-pad    │               │   │  Optimizer   │   │
//!  └──────┬───────┘               │   │ K variants   │   │
//!         ▼                       │   └──────┬───────┘   │
//!  ┌──────────────┐               │          ▼           │
//!  │ Vector Store │               │   ┌──────────────┐   │
//!  │   Gateway    │◄──────────────┼───┤ Multi-Query  │   │
//!  │ cosine index │               └───┤  Retriever   │   │
//!  └──────────────┘                   │  max-fusion  │   │
//!                                     └──────┬───────┘   │
//!                                            ▼           ▼
//!                                     ┌──────────────────────┐
//!                                     │ Response Synthesizer │
//!                                     │ budget + fallback    │
//!                                     └──────────┬───────────┘
//!                                                ▼
//!                                     reply appended to history
//!                                     (unless a newer message won)
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, providers and pipeline limits
//! - [`error`] - `RagError` taxonomy: transient/permanent provider, validation, capacity, dimension
//! - [`models`] - Shared data types: `Chunk`, `QueryPlan`, `RetrievalResult`, request/response types
//! - [`chunking`] - Fixed-size overlapping chunker and report section parsing
//! - [`llm::adapter`] - Embedding adapter with per-item retry isolation and dimension padding
//! - [`llm::providers`] - Startup strategy map from config to embedding/LLM backends
//! - [`llm::synthesis`] - Prompt assembly, bounded/unbounded budgets and fallback replies
//! - [`search::vector`] - Persisted in-memory cosine index behind the `VectorIndex` trait
//! - [`search::gateway`] - Dimension-checked, batched writes and transcript-level reads
//! - [`search::query_plan`] - Heuristic query classification and weighted variant expansion
//! - [`search::retriever`] - Concurrent variant search with max-fusion ranking
//! - [`conversation`] - Per-context session store, expiry and the retrieval-need heuristic
//! - [`pipeline`] - `ingest`, `query` and `converse` wired over the components above
//! - [`api`] - Axum HTTP handlers for transcripts, search and conversation
//! - [`state`] - Shared application state holding the pipeline

pub mod api;
pub mod chunking;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod state;
