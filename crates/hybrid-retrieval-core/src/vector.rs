//! Flat inner-product vector index over chunk embeddings.
//!
//! Vectors are stored row-major in one contiguous `Vec<f32>`, row-aligned
//! with a chunk metadata table: row `i` of the matrix is the embedding of
//! `chunks[i]`. Every vector is L2-normalized on insertion and every query
//! before scoring, so the inner product is the cosine similarity.
//!
//! The index is append-only. There is no single-item delete; removing or
//! editing content means building a new index and publishing it in place
//! of the old one (see [`IndexState`]).
//!
//! # Persisted layout
//!
//! | Part | Content |
//! |------|---------|
//! | blob | `vector_count × dimension` little-endian f32 values |
//! | chunks | row-aligned [`Chunk`] metadata |
//! | descriptor | [`IndexDescriptor`] `{model_name, dimension, vector_count}` |
//!
//! [`VectorIndex::from_parts`] validates all three against each other and
//! against the bound embedding model; any mismatch fails closed.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::{blob_to_vec, dot, normalize_l2, vec_to_blob, EmbeddingProvider};
use crate::error::{RetrievalError, RetrievalResult};
use crate::models::{Chunk, SourceStatus, VectorHit};

/// Metadata persisted next to the vector blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub model_name: String,
    pub dimension: usize,
    pub vector_count: usize,
}

/// Outcome counts of one build or append pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub added: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_name: String,
    dimension: usize,
    vectors: Vec<f32>,
    chunks: Vec<Chunk>,
    ids: HashSet<String>,
}

impl VectorIndex {
    pub fn new(model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_name: model_name.into(),
            dimension,
            vectors: Vec::new(),
            chunks: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Empty index bound to `provider`'s model and dimension.
    pub fn for_provider(provider: &dyn EmbeddingProvider) -> Self {
        Self::new(provider.model_name(), provider.dims())
    }

    /// Build a fresh index from `chunks`.
    pub async fn build(
        provider: &dyn EmbeddingProvider,
        chunks: &[Chunk],
        batch_size: usize,
    ) -> (Self, IndexReport) {
        let mut index = Self::for_provider(provider);
        let report = index.embed_and_insert(provider, chunks, batch_size).await;
        (index, report)
    }

    /// Embed and append `chunks`, skipping ids already present.
    ///
    /// Fails only when `provider` is not the model this index was built
    /// with; individual embedding failures are counted, not raised.
    pub async fn append(
        &mut self,
        provider: &dyn EmbeddingProvider,
        chunks: &[Chunk],
        batch_size: usize,
    ) -> RetrievalResult<IndexReport> {
        self.check_provider(provider)?;
        Ok(self.embed_and_insert(provider, chunks, batch_size).await)
    }

    async fn embed_and_insert(
        &mut self,
        provider: &dyn EmbeddingProvider,
        chunks: &[Chunk],
        batch_size: usize,
    ) -> IndexReport {
        let mut report = IndexReport::default();

        let mut seen = HashSet::new();
        let fresh: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| {
                let new = !self.ids.contains(&c.id) && seen.insert(c.id.as_str());
                if !new {
                    report.skipped_existing += 1;
                }
                new
            })
            .collect();

        for batch in fresh.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = match provider.embed_batch(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => vectors.into_iter().map(Ok).collect(),
                Ok(vectors) => {
                    warn!(
                        expected = batch.len(),
                        got = vectors.len(),
                        "embedding batch returned wrong count, retrying per chunk"
                    );
                    self.embed_individually(provider, batch).await
                }
                Err(e) => {
                    warn!(error = %e, size = batch.len(), "embedding batch failed, retrying per chunk");
                    self.embed_individually(provider, batch).await
                }
            };

            for (chunk, vector) in batch.iter().zip(vectors) {
                let outcome = vector.and_then(|v| self.insert((*chunk).clone(), v));
                match outcome {
                    Ok(()) => report.added += 1,
                    Err(e) => {
                        warn!(chunk_id = %chunk.id, error = %e, "skipping chunk");
                        report.failed += 1;
                    }
                }
            }
        }

        debug!(
            added = report.added,
            skipped = report.skipped_existing,
            failed = report.failed,
            total = self.len(),
            "vector index updated"
        );
        report
    }

    async fn embed_individually(
        &self,
        provider: &dyn EmbeddingProvider,
        batch: &[&Chunk],
    ) -> Vec<RetrievalResult<Vec<f32>>> {
        let mut out = Vec::with_capacity(batch.len());
        for chunk in batch {
            out.push(provider.embed_one(&chunk.content).await);
        }
        out
    }

    /// Append one pre-computed vector. The vector is normalized here.
    pub fn insert(&mut self, chunk: Chunk, mut vector: Vec<f32>) -> RetrievalResult<()> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::Embedding(format!(
                "vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        if self.ids.contains(&chunk.id) {
            return Ok(());
        }
        if !normalize_l2(&mut vector) {
            return Err(RetrievalError::Embedding(
                "vector has zero or non-finite norm".to_string(),
            ));
        }
        self.vectors.extend_from_slice(&vector);
        self.ids.insert(chunk.id.clone());
        self.chunks.push(chunk);
        Ok(())
    }

    /// Embed `query` and return up to `k` hits, best first.
    pub async fn search(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
    ) -> RetrievalResult<Vec<VectorHit>> {
        self.check_provider(provider)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = provider.embed_one(query).await?;
        Ok(self.search_vector(&query_vec, k))
    }

    /// Score every row against `query` and return the best `min(k, len)`.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }
        let mut q = query.to_vec();
        if !normalize_l2(&mut q) {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .filter_map(|row| self.row_vector(row).map(|v| (row, dot(&q, v))))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(row, score)| VectorHit {
                chunk: self.chunks[row].clone(),
                score,
            })
            .collect()
    }

    fn check_provider(&self, provider: &dyn EmbeddingProvider) -> RetrievalResult<()> {
        if provider.model_name() != self.model_name || provider.dims() != self.dimension {
            return Err(RetrievalError::IndexLoad(format!(
                "index was built with {} ({} dims) but provider is {} ({} dims)",
                self.model_name,
                self.dimension,
                provider.model_name(),
                provider.dims()
            )));
        }
        Ok(())
    }

    pub fn row_vector(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.ids.contains(chunk_id)
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        IndexDescriptor {
            model_name: self.model_name.clone(),
            dimension: self.dimension,
            vector_count: self.len(),
        }
    }

    /// Row-major little-endian blob of all vectors.
    pub fn to_blob(&self) -> Vec<u8> {
        vec_to_blob(&self.vectors)
    }

    /// Reassemble a persisted index, failing closed on any inconsistency
    /// or when the descriptor does not match the bound model.
    pub fn from_parts(
        descriptor: IndexDescriptor,
        blob: &[u8],
        chunks: Vec<Chunk>,
        expected_model: &str,
        expected_dims: usize,
    ) -> RetrievalResult<Self> {
        if descriptor.model_name != expected_model {
            return Err(RetrievalError::IndexLoad(format!(
                "index model '{}' does not match embedding model '{}'",
                descriptor.model_name, expected_model
            )));
        }
        if descriptor.dimension != expected_dims || descriptor.dimension == 0 {
            return Err(RetrievalError::IndexLoad(format!(
                "index dimension {} does not match embedding dimension {}",
                descriptor.dimension, expected_dims
            )));
        }
        if chunks.len() != descriptor.vector_count {
            return Err(RetrievalError::IndexLoad(format!(
                "descriptor declares {} vectors but metadata has {} rows",
                descriptor.vector_count,
                chunks.len()
            )));
        }
        let expected_bytes = descriptor.vector_count * descriptor.dimension * 4;
        if blob.len() != expected_bytes {
            return Err(RetrievalError::IndexLoad(format!(
                "vector blob is {} bytes, expected {}",
                blob.len(),
                expected_bytes
            )));
        }

        let vectors = blob_to_vec(blob);
        let ids: HashSet<String> = chunks.iter().map(|c| c.id.clone()).collect();
        if ids.len() != chunks.len() {
            return Err(RetrievalError::IndexLoad(
                "chunk metadata contains duplicate ids".to_string(),
            ));
        }

        Ok(Self {
            model_name: descriptor.model_name,
            dimension: descriptor.dimension,
            vectors,
            chunks,
            ids,
        })
    }
}

/// The published index as seen by queriers: either a ready, immutable
/// index or the reason it declines to serve.
#[derive(Debug, Clone)]
pub enum IndexState {
    Ready(Arc<VectorIndex>),
    Unavailable(String),
}

impl IndexState {
    pub fn ready(index: VectorIndex) -> Self {
        IndexState::Ready(Arc::new(index))
    }

    pub fn status(&self) -> SourceStatus {
        match self {
            IndexState::Ready(_) => SourceStatus::Available,
            IndexState::Unavailable(reason) => SourceStatus::Error(reason.clone()),
        }
    }

    pub fn index(&self) -> Option<&Arc<VectorIndex>> {
        match self {
            IndexState::Ready(index) => Some(index),
            IndexState::Unavailable(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.index().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn search(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
    ) -> RetrievalResult<Vec<VectorHit>> {
        match self {
            IndexState::Ready(index) => index.search(provider, query, k).await,
            IndexState::Unavailable(reason) => Err(RetrievalError::IndexLoad(reason.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{cosine_similarity, HashEmbedder};
    use async_trait::async_trait;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            source_id: "test.txt".to_string(),
            chunk_index: 0,
            size: content.chars().count(),
        }
    }

    fn corpus() -> Vec<Chunk> {
        vec![
            chunk("a", "INSAT-3D provides sea surface temperature over the Indian Ocean"),
            chunk("b", "OCEANSAT-3 carries an ocean colour monitor"),
            chunk("c", "Lightning forecast bulletins are issued every hour"),
        ]
    }

    /// Fails every batch call and every text containing "poison".
    struct FlakyEmbedder {
        inner: HashEmbedder,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn model_name(&self) -> &str {
            HashEmbedder::MODEL_NAME
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed_batch(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
            if texts.len() > 1 {
                return Err(RetrievalError::Embedding("batch endpoint down".into()));
            }
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(RetrievalError::Embedding("cannot embed".into()));
            }
            self.inner.embed_batch(texts).await
        }
    }

    #[tokio::test]
    async fn test_search_ranks_best_match_first() {
        let provider = HashEmbedder::new(128);
        let (index, report) = VectorIndex::build(&provider, &corpus(), 2).await;
        assert_eq!(report.added, 3);

        let hits = index.search(&provider, "sea surface temperature", 3).await.unwrap();
        assert_eq!(hits[0].chunk.id, "a");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_k_larger_than_index_returns_fewer() {
        let provider = HashEmbedder::new(64);
        let (index, _) = VectorIndex::build(&provider, &corpus(), 8).await;
        let hits = index.search(&provider, "ocean", 50).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(index.search(&provider, "ocean", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_returns_no_hits() {
        let provider = HashEmbedder::new(64);
        let index = VectorIndex::for_provider(&provider);
        assert!(index.search(&provider, "INSAT-3D", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failures_skip_only_failing_chunks() {
        let provider = FlakyEmbedder {
            inner: HashEmbedder::new(64),
        };
        let mut chunks = corpus();
        chunks.push(chunk("d", "poison pill chunk"));
        let (index, report) = VectorIndex::build(&provider, &chunks, 4).await;
        assert_eq!(report.added, 3);
        assert_eq!(report.failed, 1);
        assert!(!index.contains("d"));
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let provider = HashEmbedder::new(64);
        let (mut index, _) = VectorIndex::build(&provider, &corpus(), 8).await;
        let report = index.append(&provider, &corpus(), 8).await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.skipped_existing, 3);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_append_rejects_other_model() {
        let provider = HashEmbedder::new(64);
        let (mut index, _) = VectorIndex::build(&provider, &corpus(), 8).await;
        let other = HashEmbedder::new(32);
        let err = index.append(&other, &corpus(), 8).await.unwrap_err();
        assert!(matches!(err, RetrievalError::IndexLoad(_)));
    }

    #[test]
    fn test_insert_rejects_wrong_dimension() {
        let mut index = VectorIndex::new("hash", 4);
        let err = index.insert(chunk("x", "text"), vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(_)));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_parts_roundtrip_preserves_self_similarity() {
        let provider = HashEmbedder::new(96);
        let (index, _) = VectorIndex::build(&provider, &corpus(), 8).await;
        let restored = VectorIndex::from_parts(
            index.descriptor(),
            &index.to_blob(),
            index.chunks().to_vec(),
            "hash",
            96,
        )
        .unwrap();

        for (row, chunk) in restored.chunks().iter().enumerate() {
            let fresh = provider.embed_text(&chunk.content);
            let stored = restored.row_vector(row).unwrap();
            assert!((cosine_similarity(&fresh, stored) - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_from_parts_fails_closed() {
        let provider = HashEmbedder::new(16);
        let (index, _) = VectorIndex::build(&provider, &corpus(), 8).await;
        let blob = index.to_blob();

        let wrong_dims =
            VectorIndex::from_parts(index.descriptor(), &blob, index.chunks().to_vec(), "hash", 32);
        assert!(matches!(wrong_dims, Err(RetrievalError::IndexLoad(_))));

        let wrong_model = VectorIndex::from_parts(
            index.descriptor(),
            &blob,
            index.chunks().to_vec(),
            "bge-small-en-v1.5",
            16,
        );
        assert!(matches!(wrong_model, Err(RetrievalError::IndexLoad(_))));

        let truncated = VectorIndex::from_parts(
            index.descriptor(),
            &blob[..blob.len() - 4],
            index.chunks().to_vec(),
            "hash",
            16,
        );
        assert!(matches!(truncated, Err(RetrievalError::IndexLoad(_))));
    }

    #[tokio::test]
    async fn test_unavailable_state_declines_search() {
        let provider = HashEmbedder::new(16);
        let state = IndexState::Unavailable("missing descriptor".to_string());
        assert!(state.search(&provider, "anything", 3).await.is_err());
        assert!(!state.status().is_available());
        assert_eq!(state.len(), 0);
    }
}
