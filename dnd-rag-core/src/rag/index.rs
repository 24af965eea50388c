//! Vector index seam and its in-process implementation.

use super::{RetrievalError, SourceKind, SourceTag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio::sync::RwLock;

/// Identifier of a stored chunk. Monotonically increasing within one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub u64);

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk-{}", self.0)
    }
}

/// A chunk ready for insertion.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    pub source: SourceTag,
}

/// A stored chunk together with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: ChunkId,
    pub text: String,
    pub source: SourceTag,
    pub score: f32,
}

/// Storage and nearest-neighbour search over embedded chunks.
///
/// Implementations must allocate ids atomically with the insert so that
/// concurrent writers never hand out the same id twice.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert chunks, returning their ids in input order.
    async fn insert(&self, chunks: Vec<NewChunk>) -> Result<Vec<ChunkId>, RetrievalError>;

    /// Up to `limit` chunks scoring at least `min_score`, best first.
    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>, RetrievalError>;

    /// Remove every chunk.
    async fn clear(&self) -> Result<(), RetrievalError>;

    /// Remove every chunk of the given kind, returning how many were removed.
    async fn remove_kind(&self, kind: SourceKind) -> Result<usize, RetrievalError>;

    /// Number of stored chunks.
    async fn len(&self) -> Result<usize, RetrievalError>;
}

#[derive(Debug, Clone)]
struct StoredChunk {
    id: ChunkId,
    text: String,
    embedding: Vec<f32>,
    source: SourceTag,
}

#[derive(Debug, Default)]
struct IndexInner {
    next_id: u64,
    chunks: Vec<StoredChunk>,
}

/// Brute-force cosine similarity index held in memory.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    inner: RwLock<IndexInner>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert(&self, chunks: Vec<NewChunk>) -> Result<Vec<ChunkId>, RetrievalError> {
        let mut inner = self.inner.write().await;
        let mut ids = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let id = ChunkId(inner.next_id);
            inner.next_id += 1;
            inner.chunks.push(StoredChunk {
                id,
                text: chunk.text,
                embedding: chunk.embedding,
                source: chunk.source,
            });
            ids.push(id);
        }

        Ok(ids)
    }

    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().await;
        let mut scored: Vec<ScoredChunk> = inner
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                id: chunk.id,
                text: chunk.text.clone(),
                source: chunk.source.clone(),
                score: cosine_similarity(query, &chunk.embedding),
            })
            .filter(|chunk| chunk.score >= min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn clear(&self) -> Result<(), RetrievalError> {
        // Ids keep counting up across clears.
        self.inner.write().await.chunks.clear();
        Ok(())
    }

    async fn remove_kind(&self, kind: SourceKind) -> Result<usize, RetrievalError> {
        let mut inner = self.inner.write().await;
        let before = inner.chunks.len();
        inner.chunks.retain(|chunk| chunk.source.kind != kind);
        Ok(before - inner.chunks.len())
    }

    async fn len(&self) -> Result<usize, RetrievalError> {
        Ok(self.inner.read().await.chunks.len())
    }
}

/// Cosine similarity of two vectors. Zero-norm or mismatched inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
