//! Embedding adapter: batching, per-item failure isolation and dimension
//! adaptation between the embedding backend and the vector store.
//!
//! When the backend's native dimension is smaller than the store's, vectors are
//! zero-padded. The first `d_native` components are the untouched embedding.
//! Padding leaves cosine similarity between two padded vectors unchanged but
//! wastes index space and cannot be mixed with vectors from a native-dimension
//! model; it exists only to write into an index created for another model.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::llm::retry::RetryPolicy;
use crate::llm::EmbeddingBackend;

/// Outcome of embedding a batch. Failed items are skipped, not fatal.
#[derive(Debug, Default)]
pub struct EmbeddedBatch {
    /// `(input index, store-dimension vector)`, in input order
    pub vectors: Vec<(usize, Vec<f32>)>,
    /// Input indices that exhausted their retries
    pub failed: Vec<usize>,
}

pub struct EmbeddingAdapter {
    backend: Arc<dyn EmbeddingBackend>,
    store_dim: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

/// Permanent failures that any other input would hit as well.
fn is_batch_wide(err: &RagError) -> bool {
    matches!(err, RagError::PermanentProvider(_))
}

/// Zero-pad `vector` up to `dimension`. Longer vectors are a configuration error.
pub fn pad_to_dimension(mut vector: Vec<f32>, dimension: usize) -> Result<Vec<f32>> {
    if vector.len() > dimension {
        return Err(RagError::DimensionMismatch {
            native: vector.len(),
            store: dimension,
        });
    }
    vector.resize(dimension, 0.0);
    Ok(vector)
}

impl EmbeddingAdapter {
    /// Fails with [`RagError::DimensionMismatch`] when the backend produces
    /// vectors larger than the store accepts; this is checked once, at startup.
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        store_dim: usize,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let native = backend.native_dimension();
        if native > store_dim {
            return Err(RagError::DimensionMismatch {
                native,
                store: store_dim,
            });
        }
        if native < store_dim {
            tracing::warn!(
                "Embedding backend '{}' produces {native}-d vectors; zero-padding to store dimension {store_dim}",
                backend.name()
            );
        }
        Ok(Self {
            backend,
            store_dim,
            batch_size: batch_size.max(1),
            retry,
        })
    }

    /// Adapt one backend vector to the store dimension.
    fn adapt(&self, vector: Vec<f32>) -> Result<Vec<f32>> {
        let native = self.backend.native_dimension();
        if vector.len() != native {
            return Err(RagError::RejectedInput(format!(
                "backend '{}' returned a {}-d vector, expected {native}",
                self.backend.name(),
                vector.len()
            )));
        }
        pad_to_dimension(vector, self.store_dim)
    }

    /// Embed `texts` in batches. A batch that fails as a whole is retried item
    /// by item under the retry policy; items that still fail are reported in
    /// [`EmbeddedBatch::failed`]. A permanent provider failure (bad key,
    /// unknown model) stops further calls and fails every remaining item.
    pub async fn embed(&self, texts: &[String]) -> EmbeddedBatch {
        let mut out = EmbeddedBatch::default();

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let base = batch_no * self.batch_size;

            let completed = match self.backend.embed(batch).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for (offset, vector) in vectors.into_iter().enumerate() {
                        match self.adapt(vector) {
                            Ok(v) => out.vectors.push((base + offset, v)),
                            Err(e) => {
                                tracing::warn!("Skipping item {}: {e}", base + offset);
                                out.failed.push(base + offset);
                            }
                        }
                    }
                    true
                }
                Ok(vectors) => {
                    tracing::warn!(
                        "Batch {batch_no}: got {} vectors for {} texts, embedding items individually",
                        vectors.len(),
                        batch.len()
                    );
                    self.embed_individually(batch, base, &mut out).await
                }
                Err(e) if is_batch_wide(&e) => {
                    tracing::error!("Batch {batch_no} failed permanently, abandoning remaining items: {e}");
                    false
                }
                Err(e) => {
                    tracing::warn!("Batch {batch_no} failed ({e}), embedding items individually");
                    self.embed_individually(batch, base, &mut out).await
                }
            };

            if !completed {
                let done: HashSet<usize> = out
                    .vectors
                    .iter()
                    .map(|(i, _)| *i)
                    .chain(out.failed.iter().copied())
                    .collect();
                out.failed.extend((base..texts.len()).filter(|i| !done.contains(i)));
                break;
            }
        }

        out
    }

    /// Returns `false` when a permanent provider failure cut the batch short.
    async fn embed_individually(&self, batch: &[String], base: usize, out: &mut EmbeddedBatch) -> bool {
        for (offset, text) in batch.iter().enumerate() {
            let index = base + offset;
            match self.embed_one(text).await {
                Ok(v) => out.vectors.push((index, v)),
                Err(e) if is_batch_wide(&e) => {
                    tracing::error!("Embedding item {index} failed permanently, abandoning remaining items: {e}");
                    out.failed.push(index);
                    return false;
                }
                Err(e) => {
                    tracing::warn!("Embedding failed for item {index}, skipping: {e}");
                    out.failed.push(index);
                }
            }
        }
        true
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        let vector = self
            .retry
            .run("embed", || async {
                self.backend
                    .embed(&input)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| RagError::TransientProvider("no embedding returned".into()))
            })
            .await?;
        self.adapt(vector)
    }

    /// Embed a single query text, retried under the policy.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text).await
    }
}
