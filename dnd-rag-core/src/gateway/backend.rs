//! Ollama-backed implementations of the model and embedding seams.

use super::{ChatRequest, GenerateRequest, LanguageModel, ModelError};
use crate::rag::{Embedder, RetrievalError};
use async_trait::async_trait;
use ollama::Ollama;

impl From<ollama::Error> for ModelError {
    fn from(err: ollama::Error) -> Self {
        match err {
            ollama::Error::ModelNotFound(model) => ModelError::NotFound(model),
            ollama::Error::Api { status: 429, message } => ModelError::RateLimited(message),
            err if err.is_transient() => ModelError::Transport(err.to_string()),
            err => ModelError::Unavailable(err.to_string()),
        }
    }
}

#[async_trait]
impl LanguageModel for Ollama {
    async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError> {
        let response = Ollama::generate(self, request).await?;
        Ok(response.text)
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, ModelError> {
        let response = Ollama::chat(self, request).await?;
        Ok(response.text)
    }

    async fn pull(&self) -> Result<(), ModelError> {
        Ollama::pull(self, self.model()).await?;
        Ok(())
    }
}

#[async_trait]
impl Embedder for Ollama {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ollama::embed(self, inputs)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let not_found: ModelError = ollama::Error::ModelNotFound("gemma3".into()).into();
        assert!(matches!(not_found, ModelError::NotFound(ref m) if m == "gemma3"));

        let limited: ModelError = ollama::Error::Api {
            status: 429,
            message: "slow down".into(),
        }
        .into();
        assert!(matches!(limited, ModelError::RateLimited(_)));

        let refused: ModelError = ollama::Error::Network("connection refused".into()).into();
        assert!(refused.is_transient());

        let bad: ModelError = ollama::Error::Api {
            status: 400,
            message: "invalid options".into(),
        }
        .into();
        assert!(matches!(bad, ModelError::Unavailable(_)));
    }
}
