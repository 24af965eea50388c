use super::{
    Chunker, Embedder, NewChunk, Passage, RetrievalError, RetrievalStore, SourceKind, SourceTag,
    VectorIndex,
};
use crate::gateway::Gateway;
use crate::prompts;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// [`RetrievalStore`] over an embedder and a vector index.
///
/// Queries are two-hop when a reformulation gateway is set: the seed text is
/// first rewritten by the model as an explicit question, and that question
/// is embedded and searched. A failed rewrite falls back to the raw seed.
pub struct RagStore {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    reformulator: Option<Gateway>,
    min_similarity: f32,
}

impl RagStore {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            chunker: Chunker::default(),
            reformulator: None,
            min_similarity: 0.0,
        }
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Rewrite query seeds into questions through this gateway before searching.
    pub fn with_reformulation(mut self, gateway: Gateway) -> Self {
        self.reformulator = Some(gateway);
        self
    }

    /// Drop hits scoring below this cosine similarity.
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    async fn reformulate(&self, seed: &str) -> String {
        let Some(gateway) = &self.reformulator else {
            return seed.to_string();
        };

        let sampling = prompts::REFORMULATION;
        match gateway
            .generate_text(prompts::reformulation(seed), sampling.max_tokens, sampling.temperature)
            .await
        {
            Ok(question) if !question.trim().is_empty() => {
                debug!(question = question.trim(), "reformulated retrieval query");
                question.trim().to_string()
            }
            Ok(_) => seed.to_string(),
            Err(err) => {
                warn!(error = %err, "query reformulation failed, searching with raw seed");
                seed.to_string()
            }
        }
    }
}

#[async_trait]
impl RetrievalStore for RagStore {
    async fn store(&self, text: &str, tag: SourceTag) -> Result<usize, RetrievalError> {
        let chunks = self.chunker.split(text);
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings = self.embedder.embed(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(RetrievalError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let batch = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text, embedding)| NewChunk {
                text,
                embedding,
                source: tag.clone(),
            })
            .collect();

        let ids = self.index.insert(batch).await?;
        debug!(source = %tag, chunks = ids.len(), first_id = ?ids.first(), "stored text");
        Ok(ids.len())
    }

    async fn query(&self, seed: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError> {
        if limit == 0 || seed.trim().is_empty() || self.index.len().await? == 0 {
            return Ok(Vec::new());
        }

        let question = self.reformulate(seed).await;
        let Some(embedding) = self.embedder.embed(&[question]).await?.pop() else {
            return Ok(Vec::new());
        };

        // Over-fetch so duplicates removed below do not shrink the result.
        let hits = self
            .index
            .nearest(&embedding, limit * 2, self.min_similarity)
            .await?;

        let mut seen = HashSet::new();
        let passages: Vec<Passage> = hits
            .into_iter()
            .filter(|hit| seen.insert(hit.text.clone()))
            .take(limit)
            .map(Passage::from)
            .collect();

        debug!(limit, returned = passages.len(), "retrieval query");
        Ok(passages)
    }

    async fn reset(&self) -> Result<(), RetrievalError> {
        self.index.clear().await
    }

    async fn reset_narrative(&self) -> Result<(), RetrievalError> {
        let removed = self.index.remove_kind(SourceKind::Narrative).await?;
        debug!(removed, "cleared narrative chunks");
        Ok(())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        self.index.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ModelError, RetryPolicy};
    use crate::rag::InMemoryIndex;
    use crate::testing::{HashEmbedder, ScriptedModel};

    fn store() -> RagStore {
        RagStore::new(Arc::new(InMemoryIndex::new()), Arc::new(HashEmbedder::new()))
    }

    #[tokio::test]
    async fn test_empty_store_query_is_empty() {
        let store = store();
        assert!(store.query("anything", 5).await.unwrap().is_empty());
        store.reset().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_counts_chunks() {
        let store = store().with_chunker(Chunker::new(40, 10));
        let written = store
            .store(
                "The party leaves the inn at dawn. Rain falls on the old road north. A crow watches.",
                SourceTag::narrative("intro"),
            )
            .await
            .unwrap();
        assert!(written > 1);
        assert_eq!(store.count().await.unwrap(), written);

        assert_eq!(store.store("   ", SourceTag::narrative("empty")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_ranks_relevant_first() {
        let store = store();
        store
            .store("The harbor town trades fish and salt.", SourceTag::lore("towns"))
            .await
            .unwrap();
        store
            .store("The red dragon sleeps under the mountain.", SourceTag::narrative("dm_turn_1"))
            .await
            .unwrap();

        let passages = store.query("where does the dragon sleep", 5).await.unwrap();
        assert_eq!(passages.len(), 2);
        assert!(passages[0].text.contains("dragon"));
        assert!(passages[0].score >= passages[1].score);
    }

    #[tokio::test]
    async fn test_duplicates_collapse() {
        let store = store();
        for _ in 0..3 {
            store
                .store("The innkeeper hides a key.", SourceTag::narrative("dm_turn_1"))
                .await
                .unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 3);

        let passages = store.query("innkeeper key", 5).await.unwrap();
        assert_eq!(passages.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_narrative_keeps_lore() {
        let store = store();
        store.store("Goblins fear fire.", SourceTag::lore("bestiary")).await.unwrap();
        store.store("Aria lights a torch.", SourceTag::narrative("player_turn_1")).await.unwrap();

        store.reset_narrative().await.unwrap();
        let passages = store.query("goblins fire torch", 5).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].source, SourceTag::lore("bestiary"));
    }

    #[tokio::test]
    async fn test_reformulation_is_used() {
        let model = Arc::new(ScriptedModel::new());
        model.push_text("Where does the dragon sleep?");
        let gateway = Gateway::new(model.clone()).with_retry(RetryPolicy::immediate(1));

        let store = store().with_reformulation(gateway);
        store
            .store("The red dragon sleeps under the mountain.", SourceTag::narrative("intro"))
            .await
            .unwrap();

        let passages = store.query("The party wonders about the beast.", 5).await.unwrap();
        assert!(!passages.is_empty());
        assert_eq!(model.generate_calls(), 1);
        assert!(model.prompts()[0].contains("The party wonders about the beast."));
    }

    #[tokio::test]
    async fn test_reformulation_failure_falls_back() {
        let model = Arc::new(ScriptedModel::new());
        model.push_generate_error(ModelError::Unavailable("offline".into()));
        let gateway = Gateway::new(model.clone()).with_retry(RetryPolicy::immediate(1));

        let store = store().with_reformulation(gateway);
        store
            .store("The red dragon sleeps under the mountain.", SourceTag::narrative("intro"))
            .await
            .unwrap();

        let passages = store.query("dragon mountain", 5).await.unwrap();
        assert_eq!(passages.len(), 1);
    }
}
