//! Retrieval Store Adapter.
//!
//! Narrative and lore are chunked, embedded and kept in a [`VectorIndex`].
//! The engine only sees the [`RetrievalStore`] boundary: `store`, `query`,
//! `reset` and `count`, plus `reset_narrative` for keeping lore across a
//! new party.

mod chunk;
mod index;
mod lore;
mod store;

pub use chunk::Chunker;
pub use index::{cosine_similarity, ChunkId, InMemoryIndex, NewChunk, ScoredChunk, VectorIndex};
pub use lore::{IngestSummary, LoreLibrary, LORE_EXTENSIONS};
pub use store::RagStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from embedding, indexing or reading lore.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a stored chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Text produced during play (intro, player actions, DM turns).
    Narrative,
    /// Uploaded reference documents.
    Lore,
}

/// Provenance metadata attached to stored chunks. Never used for filtering queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceTag {
    pub kind: SourceKind,
    pub label: String,
}

impl SourceTag {
    pub fn narrative(label: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Narrative,
            label: label.into(),
        }
    }

    pub fn lore(label: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Lore,
            label: label.into(),
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            SourceKind::Narrative => write!(f, "narrative:{}", self.label),
            SourceKind::Lore => write!(f, "lore:{}", self.label),
        }
    }
}

/// A retrieved text fragment. Identity is its content only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source: SourceTag,
    pub score: f32,
}

impl From<ScoredChunk> for Passage {
    fn from(chunk: ScoredChunk) -> Self {
        Self {
            text: chunk.text,
            source: chunk.source,
            score: chunk.score,
        }
    }
}

/// Turns text into embedding vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch; the result has one vector per input, in order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

/// The store boundary the engine writes narrative into and reads context from.
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    /// Chunk, embed and persist `text`. Returns the number of chunks written.
    async fn store(&self, text: &str, tag: SourceTag) -> Result<usize, RetrievalError>;

    /// Up to `limit` passages relevant to `seed`, most similar first.
    ///
    /// An empty store or no match above the similarity floor yields an
    /// empty list, not an error.
    async fn query(&self, seed: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError>;

    /// Delete every stored chunk. Idempotent.
    async fn reset(&self) -> Result<(), RetrievalError>;

    /// Delete narrative chunks and keep lore.
    async fn reset_narrative(&self) -> Result<(), RetrievalError>;

    /// Number of stored chunks.
    async fn count(&self) -> Result<usize, RetrievalError>;
}
