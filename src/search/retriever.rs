use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::llm::adapter::EmbeddingAdapter;
use crate::models::{ChunkFilter, QueryPlan, QueryVariant, Retrieval, RetrievalResult};
use crate::search::gateway::VectorGateway;
use crate::search::vector::VectorHit;

/// Matches returned for one query variant.
pub struct VariantHits {
    pub variant: QueryVariant,
    pub hits: Vec<VectorHit>,
}

/// Runs every variant of a plan against the gateway and fuses the results.
pub struct MultiQueryRetriever {
    embedder: Arc<EmbeddingAdapter>,
    gateway: Arc<VectorGateway>,
    max_parallel: usize,
    variant_timeout: Duration,
}

impl MultiQueryRetriever {
    pub fn new(
        embedder: Arc<EmbeddingAdapter>,
        gateway: Arc<VectorGateway>,
        max_parallel: usize,
        variant_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            gateway,
            max_parallel: max_parallel.max(1),
            variant_timeout,
        }
    }

    /// Ranked, deduplicated results, at most `top_k`.
    ///
    /// A variant that errors or exceeds the per-variant timeout contributes
    /// nothing; when every variant fails the result is empty with
    /// `no_context_found` set. Results scoring below `min_score` are dropped.
    pub async fn retrieve(
        &self,
        plan: &QueryPlan,
        filter: &ChunkFilter,
        top_k: usize,
        min_score: Option<f32>,
    ) -> Retrieval {
        if top_k == 0 || plan.variants.is_empty() {
            return Retrieval {
                no_context_found: true,
                ..Retrieval::default()
            };
        }

        // ── Step 1: Search every variant, bounded parallelism ──
        let outcomes: Vec<(QueryVariant, Result<Vec<VectorHit>>)> =
            stream::iter(plan.variants.iter().cloned())
                .map(|variant| async move {
                    let result = self.search_variant(&variant.text, filter, top_k).await;
                    (variant, result)
                })
                .buffered(self.max_parallel)
                .collect()
                .await;

        // ── Step 2: Keep what succeeded ───────────────────
        let mut failed_variants = 0;
        let mut per_variant = Vec::with_capacity(outcomes.len());
        for (variant, outcome) in outcomes {
            match outcome {
                Ok(hits) => {
                    tracing::debug!("Variant '{}' returned {} hits", variant.text, hits.len());
                    per_variant.push(VariantHits { variant, hits });
                }
                Err(e) => {
                    tracing::warn!("Variant '{}' failed, treating as empty: {e}", variant.text);
                    failed_variants += 1;
                }
            }
        }

        // ── Step 3: Max-fusion ────────────────────────────
        let mut results = fuse(&per_variant, top_k);
        if let Some(min) = min_score {
            results.retain(|r| r.score >= min);
        }

        tracing::info!(
            "Retrieved {} results from {} variants ({failed_variants} failed)",
            results.len(),
            plan.variants.len()
        );

        Retrieval {
            no_context_found: results.is_empty(),
            results,
            failed_variants,
        }
    }

    async fn search_variant(
        &self,
        text: &str,
        filter: &ChunkFilter,
        top_k: usize,
    ) -> Result<Vec<VectorHit>> {
        let search = async {
            let vector = self.embedder.embed_query(text).await?;
            self.gateway.query(&vector, filter, top_k).await
        };
        tokio::time::timeout(self.variant_timeout, search)
            .await
            .map_err(|_| {
                RagError::TransientProvider(format!(
                    "variant search timed out after {:?}",
                    self.variant_timeout
                ))
            })?
    }
}

/// Fuse per-variant matches: each chunk scores the best `similarity × weight`
/// over all variants that returned it. Sorted by fused score descending, ties
/// broken by ascending `chunk_index`, truncated to `limit`, ranks from 1.
pub fn fuse(per_variant: &[VariantHits], limit: usize) -> Vec<RetrievalResult> {
    let mut best: HashMap<&str, RetrievalResult> = HashMap::new();

    for vh in per_variant {
        for hit in &vh.hits {
            let fused = hit.score * vh.variant.weight;
            match best.get_mut(hit.chunk_id.as_str()) {
                Some(existing) if existing.score >= fused => {}
                Some(existing) => {
                    existing.score = fused;
                    existing.matched_variant = vh.variant.text.clone();
                }
                None => {
                    best.insert(
                        &hit.chunk_id,
                        RetrievalResult {
                            chunk_id: hit.chunk_id.clone(),
                            score: fused,
                            rank: 0,
                            chunk_index: hit.chunk_index,
                            transcript_name: hit.transcript_name.clone(),
                            context_id: hit.context_id.clone(),
                            text: hit.text.clone(),
                            matched_variant: vh.variant.text.clone(),
                        },
                    );
                }
            }
        }
    }

    let mut results: Vec<RetrievalResult> = best.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(limit);
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    results
}
