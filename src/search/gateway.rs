//! Vector store gateway: the only writer of persisted chunks.
//!
//! Checks vector dimensions before anything reaches the index, writes in
//! bounded batches (each acknowledged before the next is issued) and serves
//! transcript-level reads built from chunk metadata.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::chunking::sections::ReportSections;
use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkFilter, TranscriptSummary};
use crate::search::vector::{VectorHit, VectorIndex};

/// Marker inserted where chunks of a transcript are missing.
const GAP_MARKER: &str = "\n[...]\n";

pub struct VectorGateway {
    index: Arc<dyn VectorIndex>,
    upsert_batch_size: usize,
}

impl VectorGateway {
    pub fn new(index: Arc<dyn VectorIndex>, upsert_batch_size: usize) -> Self {
        Self {
            index,
            upsert_batch_size: upsert_batch_size.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    fn check_dimension(&self, len: usize, what: &str) -> Result<()> {
        let dim = self.index.dimension();
        if len != dim {
            return Err(RagError::Validation(format!(
                "{what} has dimension {len}, store dimension is {dim}"
            )));
        }
        Ok(())
    }

    /// Write chunks, overwriting by id. Returns the number written.
    ///
    /// All or nothing: capacity is checked for the whole write up front, and
    /// batches already written are removed again when a later batch fails.
    pub async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize> {
        for chunk in &chunks {
            self.check_dimension(chunk.embedding.len(), &format!("chunk {}", chunk.id))?;
        }
        self.index.check_capacity(&chunks)?;

        let total = chunks.len();
        let mut written: Vec<String> = Vec::with_capacity(total);
        let mut rest = chunks;
        while !rest.is_empty() {
            let tail = rest.split_off(self.upsert_batch_size.min(rest.len()));
            let ids: Vec<String> = rest.iter().map(|c| c.id.clone()).collect();
            if let Err(e) = self.index.upsert(rest).await {
                self.roll_back(&written).await;
                return Err(e);
            }
            tracing::debug!("Upserted batch of {} chunks", ids.len());
            written.extend(ids);
            rest = tail;
        }
        Ok(total)
    }

    async fn roll_back(&self, written: &[String]) {
        if written.is_empty() {
            return;
        }
        match self.index.remove(written).await {
            Ok(removed) => tracing::warn!("Upsert failed, removed {removed} chunks already written"),
            Err(e) => tracing::error!(
                "Upsert failed and {} written chunks could not be removed: {e}",
                written.len()
            ),
        }
    }

    pub async fn query(
        &self,
        vector: &[f32],
        filter: &ChunkFilter,
        top_k: usize,
    ) -> Result<Vec<VectorHit>> {
        self.check_dimension(vector.len(), "query vector")?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.index.query(vector, filter, top_k).await
    }

    /// One summary per ingested transcript version, newest first.
    pub async fn list_transcripts(&self, context_id: Option<&str>) -> Result<Vec<TranscriptSummary>> {
        let filter = ChunkFilter {
            transcript_name: None,
            context_id: context_id.map(str::to_string),
        };
        let chunks = self.index.fetch(&filter).await?;

        let mut versions: HashMap<Uuid, TranscriptSummary> = HashMap::new();
        for chunk in chunks {
            versions
                .entry(chunk.transcript_id)
                .or_insert_with(|| TranscriptSummary {
                    transcript_id: chunk.transcript_id,
                    transcript_name: chunk.transcript_name.clone(),
                    context_id: chunk.context_id.clone(),
                    source_tag: chunk.source_tag.clone(),
                    total_chunks: chunk.total_chunks,
                    created_at: chunk.created_at,
                });
        }

        let mut summaries: Vec<TranscriptSummary> = versions.into_values().collect();
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.transcript_name.cmp(&b.transcript_name))
        });
        Ok(summaries)
    }

    /// Chunks of the newest version of a transcript, in order.
    async fn latest_version(&self, context_id: &str, transcript_name: &str) -> Result<Vec<Chunk>> {
        let chunks = self
            .index
            .fetch(&ChunkFilter::transcript(context_id, transcript_name))
            .await?;

        let Some(latest) = chunks
            .iter()
            .max_by_key(|c| c.created_at)
            .map(|c| c.transcript_id)
        else {
            return Ok(Vec::new());
        };

        let mut version: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| c.transcript_id == latest)
            .collect();
        version.sort_by_key(|c| c.chunk_index);
        Ok(version)
    }

    /// Text of the newest version, rebuilt from chunk offsets with overlaps removed.
    pub async fn transcript_text(
        &self,
        context_id: &str,
        transcript_name: &str,
    ) -> Result<Option<String>> {
        let chunks = self.latest_version(context_id, transcript_name).await?;
        if chunks.is_empty() {
            return Ok(None);
        }
        Ok(Some(reconstruct(&chunks)))
    }

    /// Report sections of the newest version, read from chunk 0's tags.
    pub async fn sections(
        &self,
        context_id: &str,
        transcript_name: &str,
    ) -> Result<Option<ReportSections>> {
        let chunks = self.latest_version(context_id, transcript_name).await?;
        Ok(chunks
            .first()
            .map(|first| ReportSections::from_tags(&first.section_tags)))
    }

    pub async fn delete_context(&self, context_id: &str) -> Result<usize> {
        let removed = self.index.delete(&ChunkFilter::context(context_id)).await?;
        tracing::info!("Deleted {removed} chunks for context {context_id}");
        Ok(removed)
    }
}

/// Concatenate the non-overlapping part of each chunk. Chunks must be sorted
/// by index; a missing chunk leaves a gap marker.
fn reconstruct(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered = 0usize;

    for chunk in chunks {
        if chunk.offset_start > covered {
            text.push_str(GAP_MARKER);
        }
        let skip = covered.saturating_sub(chunk.offset_start);
        if let Some(fresh) = chunk.text.get(skip..) {
            text.push_str(fresh);
        }
        covered = covered.max(chunk.offset_end);
    }

    text
}
