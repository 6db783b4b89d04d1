use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkFilter};

/// A similarity match returned by a vector index.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub transcript_name: String,
    pub context_id: String,
    pub text: String,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

/// Persistent nearest-neighbour index over chunks.
///
/// Any backend (local file, hosted index) can sit behind this; the gateway
/// only relies on overwrite-by-id upserts and filtered cosine queries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Fixed dimension of every stored vector.
    fn dimension(&self) -> usize;

    /// Fails with [`RagError::Capacity`] when `chunks` would not all fit.
    /// Overwrites of stored ids do not count.
    fn check_capacity(&self, chunks: &[Chunk]) -> Result<()>;

    /// Insert or overwrite chunks by id. May fail with [`RagError::Capacity`].
    /// A failed upsert leaves the index unchanged.
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// Best `top_k` matches by cosine similarity among chunks passing `filter`.
    async fn query(&self, vector: &[f32], filter: &ChunkFilter, top_k: usize)
        -> Result<Vec<VectorHit>>;

    /// Every chunk passing `filter`, in id order.
    async fn fetch(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>>;

    /// Remove every chunk passing `filter`; returns how many were removed.
    async fn delete(&self, filter: &ChunkFilter) -> Result<usize>;

    /// Remove chunks by id; returns how many were removed.
    async fn remove(&self, ids: &[String]) -> Result<usize>;

    async fn len(&self) -> usize;
}

/// In-memory vector index with JSON persistence and brute-force cosine search.
pub struct LocalVectorStore {
    entries: RwLock<BTreeMap<String, Chunk>>,
    persist_path: Option<PathBuf>,
    dimension: usize,
    /// 0 = unlimited
    max_entries: usize,
}

impl LocalVectorStore {
    pub fn open_or_create(vector_dir: &Path, dimension: usize, max_entries: usize) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)?;
        let persist_path = vector_dir.join("chunks.json");

        let mut entries = BTreeMap::new();
        if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)?;
            let chunks: Vec<Chunk> = serde_json::from_str(&data)?;
            for chunk in chunks {
                if chunk.embedding.len() != dimension {
                    return Err(RagError::Validation(format!(
                        "{} holds {}-d vectors but the store is configured for {dimension}",
                        persist_path.display(),
                        chunk.embedding.len()
                    )));
                }
                entries.insert(chunk.id.clone(), chunk);
            }
            tracing::info!("Loaded {} chunks from {}", entries.len(), persist_path.display());
        }

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path: Some(persist_path),
            dimension,
            max_entries,
        })
    }

    /// A store that never touches disk.
    pub fn in_memory(dimension: usize, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            persist_path: None,
            dimension,
            max_entries,
        }
    }

    /// Atomic write via temp file + rename.
    fn persist(&self, entries: &BTreeMap<String, Chunk>) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let chunks: Vec<&Chunk> = entries.values().collect();
        let data = serde_json::to_string(&chunks)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn capacity_error(&self, entries: &BTreeMap<String, Chunk>, chunks: &[Chunk]) -> Option<RagError> {
        if self.max_entries == 0 {
            return None;
        }
        let new = chunks
            .iter()
            .filter(|c| !entries.contains_key(&c.id))
            .count();
        (entries.len() + new > self.max_entries).then(|| {
            RagError::Capacity(format!(
                "vector store holds {} of {} entries, cannot add {new} more",
                entries.len(),
                self.max_entries
            ))
        })
    }

    /// Persist `entries` after removing `taken`; on failure put them back.
    fn persist_removal(&self, entries: &mut BTreeMap<String, Chunk>, taken: Vec<Chunk>) -> Result<usize> {
        if taken.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.persist(entries) {
            for chunk in taken {
                entries.insert(chunk.id.clone(), chunk);
            }
            return Err(e);
        }
        Ok(taken.len())
    }
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_capacity(&self, chunks: &[Chunk]) -> Result<()> {
        match self.capacity_error(&self.entries.read(), chunks) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<()> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != self.dimension) {
            return Err(RagError::Validation(format!(
                "chunk {} has a {}-d vector, store dimension is {}",
                bad.id,
                bad.embedding.len(),
                self.dimension
            )));
        }

        let mut entries = self.entries.write();
        if let Some(err) = self.capacity_error(&entries, &chunks) {
            return Err(err);
        }

        let mut previous: Vec<(String, Option<Chunk>)> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = chunk.id.clone();
            let old = entries.insert(id.clone(), chunk);
            previous.push((id, old));
        }

        if let Err(e) = self.persist(&entries) {
            // Undo newest first so repeated ids end at their original value
            for (id, old) in previous.into_iter().rev() {
                match old {
                    Some(chunk) => {
                        entries.insert(id, chunk);
                    }
                    None => {
                        entries.remove(&id);
                    }
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &ChunkFilter,
        top_k: usize,
    ) -> Result<Vec<VectorHit>> {
        let entries = self.entries.read();

        let mut scored: Vec<(f32, &Chunk)> = entries
            .values()
            .filter(|c| filter.matches(c))
            .map(|c| (cosine_similarity(vector, &c.embedding), c))
            .collect();

        // Sort descending by score; earlier chunks win ties
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.chunk_index.cmp(&b.1.chunk_index))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, c)| VectorHit {
                chunk_id: c.id.clone(),
                chunk_index: c.chunk_index,
                transcript_name: c.transcript_name.clone(),
                context_id: c.context_id.clone(),
                text: c.text.clone(),
                score,
            })
            .collect())
    }

    async fn fetch(&self, filter: &ChunkFilter) -> Result<Vec<Chunk>> {
        let entries = self.entries.read();
        Ok(entries
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn delete(&self, filter: &ChunkFilter) -> Result<usize> {
        let mut entries = self.entries.write();
        let ids: Vec<String> = entries
            .values()
            .filter(|c| filter.matches(c))
            .map(|c| c.id.clone())
            .collect();
        let taken: Vec<Chunk> = ids.iter().filter_map(|id| entries.remove(id)).collect();
        self.persist_removal(&mut entries, taken)
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        let mut entries = self.entries.write();
        let taken: Vec<Chunk> = ids.iter().filter_map(|id| entries.remove(id)).collect();
        self.persist_removal(&mut entries, taken)
    }

    async fn len(&self) -> usize {
        self.entries.read().len()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn chunk(transcript_id: Uuid, name: &str, ctx: &str, index: usize, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: Chunk::make_id(transcript_id, index),
            transcript_id,
            transcript_name: name.into(),
            context_id: ctx.into(),
            source_tag: "file".into(),
            text: format!("{name} part {index}"),
            offset_start: 0,
            offset_end: 0,
            chunk_index: index,
            total_chunks: 3,
            section_tags: vec![],
            embedding,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_zero_padding_preserves_cosine() {
        let a = [0.3, -0.2, 0.9];
        let b = [0.1, 0.4, 0.5];
        let pa = [0.3, -0.2, 0.9, 0.0, 0.0, 0.0];
        let pb = [0.1, 0.4, 0.5, 0.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&pa, &pb)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = LocalVectorStore::in_memory(2, 0);
        let t = Uuid::new_v4();
        store.upsert(vec![chunk(t, "standup", "1", 0, vec![1.0, 0.0])]).await.unwrap();
        let mut again = chunk(t, "standup", "1", 0, vec![0.0, 1.0]);
        again.text = "rewritten".into();
        store.upsert(vec![again]).await.unwrap();

        assert_eq!(store.len().await, 1);
        let hits = store.query(&[0.0, 1.0], &ChunkFilter::default(), 5).await.unwrap();
        assert_eq!(hits[0].text, "rewritten");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_filters_with_and_semantics() {
        let store = LocalVectorStore::in_memory(2, 0);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store
            .upsert(vec![
                chunk(a, "standup", "1", 0, vec![1.0, 0.0]),
                chunk(b, "standup", "2", 0, vec![1.0, 0.0]),
                chunk(c, "retro", "1", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .query(&[1.0, 0.0], &ChunkFilter::transcript("1", "standup"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, Chunk::make_id(a, 0));

        let hits = store.query(&[1.0, 0.0], &ChunkFilter::context("1"), 10).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_query_ranked_and_bounded() {
        let store = LocalVectorStore::in_memory(2, 0);
        let t = Uuid::new_v4();
        store
            .upsert(vec![
                chunk(t, "x", "1", 0, vec![0.0, 1.0]),
                chunk(t, "x", "1", 1, vec![1.0, 0.1]),
                chunk(t, "x", "1", 2, vec![1.0, 0.5]),
            ])
            .await
            .unwrap();
        let hits = store.query(&[1.0, 0.0], &ChunkFilter::default(), 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 1);
        assert_eq!(hits[1].chunk_index, 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = LocalVectorStore::in_memory(1, 2);
        let t = Uuid::new_v4();
        store
            .upsert(vec![chunk(t, "x", "1", 0, vec![1.0]), chunk(t, "x", "1", 1, vec![1.0])])
            .await
            .unwrap();
        // Overwriting an existing id does not count against the limit
        store.upsert(vec![chunk(t, "x", "1", 1, vec![0.5])]).await.unwrap();
        let err = store.upsert(vec![chunk(t, "x", "1", 2, vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::Capacity(_)));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open_or_create(dir.path(), 2, 0).unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.upsert(vec![chunk(a, "standup", "1", 0, vec![1.0, 0.0])]).await.unwrap();

        // A directory where the temp file goes makes every persist fail
        std::fs::create_dir(dir.path().join("chunks.json.tmp")).unwrap();

        let mut changed = chunk(a, "standup", "1", 0, vec![0.0, 1.0]);
        changed.text = "rewritten".into();
        let err = store
            .upsert(vec![changed, chunk(b, "retro", "1", 0, vec![0.0, 1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));
        assert_eq!(store.len().await, 1);
        let hits = store.query(&[0.0, 1.0], &ChunkFilter::default(), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "standup part 0");

        assert!(store.delete(&ChunkFilter::context("1")).await.is_err());
        assert_eq!(store.len().await, 1);
        assert!(store.remove(&[Chunk::make_id(a, 0)]).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_check_capacity_counts_only_new_ids() {
        let store = LocalVectorStore::in_memory(1, 2);
        let t = Uuid::new_v4();
        store.upsert(vec![chunk(t, "x", "1", 0, vec![1.0])]).await.unwrap();
        assert!(store
            .check_capacity(&[chunk(t, "x", "1", 0, vec![1.0]), chunk(t, "x", "1", 1, vec![1.0])])
            .is_ok());
        assert!(matches!(
            store.check_capacity(&[chunk(t, "x", "1", 1, vec![1.0]), chunk(t, "x", "1", 2, vec![1.0])]),
            Err(RagError::Capacity(_))
        ));

        assert_eq!(store.remove(&[Chunk::make_id(t, 0), "unknown".into()]).await.unwrap(), 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let store = LocalVectorStore::in_memory(3, 0);
        let err = store
            .upsert(vec![chunk(Uuid::new_v4(), "x", "1", 0, vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_persistence_roundtrip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        {
            let store = LocalVectorStore::open_or_create(dir.path(), 2, 0).unwrap();
            store
                .upsert(vec![
                    chunk(a, "standup", "1", 0, vec![1.0, 0.0]),
                    chunk(b, "standup", "2", 0, vec![0.0, 1.0]),
                ])
                .await
                .unwrap();
            assert_eq!(store.delete(&ChunkFilter::context("2")).await.unwrap(), 1);
        }

        let reopened = LocalVectorStore::open_or_create(dir.path(), 2, 0).unwrap();
        assert_eq!(reopened.len().await, 1);
        let chunks = reopened.fetch(&ChunkFilter::default()).await.unwrap();
        assert_eq!(chunks[0].transcript_id, a);
        assert!(!dir.path().join("chunks.json.tmp").exists());
    }

    #[test]
    fn test_reopen_with_other_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let t = Uuid::new_v4();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = LocalVectorStore::open_or_create(dir.path(), 2, 0).unwrap();
            store.upsert(vec![chunk(t, "x", "1", 0, vec![1.0, 0.0])]).await.unwrap();
        });
        assert!(LocalVectorStore::open_or_create(dir.path(), 4, 0).is_err());
    }
}
