//! Generation Gateway - the single path from the engine to a language model.
//!
//! Two call shapes are offered:
//! - free-form text ([`Gateway::generate_text`], [`Gateway::chat_text`])
//! - schema-constrained JSON ([`Gateway::generate_json`])
//!
//! Every call goes through the transport retry policy. A "model not found"
//! answer triggers one pull of the model followed by a retry; the pull does
//! not consume a transport attempt. Schema-parse retries are the caller's
//! concern (see [`retry_schema`]).

mod backend;
pub mod json;
mod retry;

pub use json::{extract_json, parse_payload};
pub use ollama::{ChatMessage, ChatRequest, GenerateRequest, Role};
pub use retry::{retry_schema, Backoff, RetryPolicy};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure reported by a [`LanguageModel`] implementation.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

impl ModelError {
    /// Whether the same call may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transport(_) | ModelError::RateLimited(_))
    }
}

/// Errors surfaced by the gateway after its own recovery has run out.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Structured output did not parse: {0}")]
    SchemaParse(String),
}

impl From<ModelError> for GatewayError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Transport(m) | ModelError::RateLimited(m) => GatewayError::Transport(m),
            ModelError::NotFound(m) => GatewayError::ModelNotFound(m),
            ModelError::Unavailable(m) => GatewayError::ModelUnavailable(m),
        }
    }
}

/// The transport boundary: anything that can complete prompts.
///
/// Implementations perform a single attempt; the [`Gateway`] owns retries.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Single-prompt completion.
    async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError>;

    /// Chat completion, optionally constrained by `request.format`.
    async fn chat(&self, request: ChatRequest) -> Result<String, ModelError>;

    /// Fetch the configured model onto the host.
    async fn pull(&self) -> Result<(), ModelError>;
}

enum Call {
    Generate(GenerateRequest),
    Chat(ChatRequest),
}

impl Call {
    fn kind(&self) -> &'static str {
        match self {
            Call::Generate(_) => "generate",
            Call::Chat(_) => "chat",
        }
    }
}

/// Shared handle issuing model calls with retry and model provisioning.
#[derive(Clone)]
pub struct Gateway {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl Gateway {
    /// Create a gateway with the default transport policy.
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            retry: RetryPolicy::transport(),
        }
    }

    /// Override the transport retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The transport retry policy in use.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Free-form completion of a single prompt.
    pub async fn generate_text(
        &self,
        prompt: impl Into<String>,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, GatewayError> {
        let request = GenerateRequest::new(prompt)
            .with_max_tokens(max_tokens)
            .with_temperature(temperature);
        self.call_with_recovery(Call::Generate(request)).await
    }

    /// Free-form chat completion.
    pub async fn chat_text(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, GatewayError> {
        let request = ChatRequest::new(messages)
            .with_max_tokens(max_tokens)
            .with_temperature(temperature);
        self.call_with_recovery(Call::Chat(request)).await
    }

    /// Schema-constrained chat completion, decoded into `T`.
    ///
    /// The schema is passed to the model as the output format, and the reply
    /// is run through [`extract_json`] before decoding. A reply that does not
    /// decode fails with [`GatewayError::SchemaParse`] and is not retried here.
    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        messages: Vec<ChatMessage>,
        schema: serde_json::Value,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<T, GatewayError> {
        let request = ChatRequest::new(messages)
            .with_format(schema)
            .with_max_tokens(max_tokens)
            .with_temperature(temperature);
        let raw = self.call_with_recovery(Call::Chat(request)).await?;
        parse_payload(&raw)
    }

    async fn call_with_recovery(&self, call: Call) -> Result<String, GatewayError> {
        let attempts = self.retry.attempts();
        let mut attempt = 1;
        let mut pulled = false;

        loop {
            let result = match &call {
                Call::Generate(request) => self.model.generate(request.clone()).await,
                Call::Chat(request) => self.model.chat(request.clone()).await,
            };

            match result {
                Ok(text) => {
                    debug!(kind = call.kind(), attempt, chars = text.len(), "model call succeeded");
                    return Ok(text);
                }
                Err(ModelError::NotFound(model)) if !pulled => {
                    info!(kind = call.kind(), %model, "model not found, pulling before retry");
                    pulled = true;
                    self.model.pull().await?;
                }
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(kind = call.kind(), attempt, attempts, error = %err, "transient model failure, retrying");
                    self.retry.wait(attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(kind = call.kind(), attempt, error = %err, "model call failed");
                    return Err(err.into());
                }
            }
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").field("retry", &self.retry).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use serde::Deserialize;

    fn gateway(model: &Arc<ScriptedModel>) -> Gateway {
        Gateway::new(model.clone()).with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let model = Arc::new(ScriptedModel::new());
        model.push_generate_error(ModelError::Transport("connection refused".into()));
        model.push_generate_error(ModelError::RateLimited("429".into()));
        model.push_text("The cavern opens before you.");

        let text = gateway(&model).generate_text("go", 100, 0.8).await.unwrap();
        assert_eq!(text, "The cavern opens before you.");
        assert_eq!(model.generate_calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_budget_exhausted() {
        let model = Arc::new(ScriptedModel::new());
        for _ in 0..3 {
            model.push_generate_error(ModelError::Transport("connection refused".into()));
        }
        model.push_text("never reached");

        let err = gateway(&model).generate_text("go", 100, 0.8).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(model.generate_calls(), 3);
    }

    #[tokio::test]
    async fn test_not_found_pulls_once_then_retries() {
        let model = Arc::new(ScriptedModel::new());
        model.push_generate_error(ModelError::NotFound("gemma3".into()));
        model.push_text("Welcome, travellers.");

        let text = gateway(&model).generate_text("go", 100, 0.8).await.unwrap();
        assert_eq!(text, "Welcome, travellers.");
        assert_eq!(model.pull_calls(), 1);
        assert_eq!(model.generate_calls(), 2);
    }

    #[tokio::test]
    async fn test_not_found_twice_surfaces() {
        let model = Arc::new(ScriptedModel::new());
        model.push_generate_error(ModelError::NotFound("gemma3".into()));
        model.push_generate_error(ModelError::NotFound("gemma3".into()));

        let err = gateway(&model).generate_text("go", 100, 0.8).await.unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotFound(ref m) if m == "gemma3"));
        assert_eq!(model.pull_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_is_not_retried() {
        let model = Arc::new(ScriptedModel::new());
        model.push_generate_error(ModelError::Unavailable("bad request".into()));

        let err = gateway(&model).generate_text("go", 100, 0.8).await.unwrap_err();
        assert!(matches!(err, GatewayError::ModelUnavailable(_)));
        assert_eq!(model.generate_calls(), 1);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Choices {
        choice: Vec<String>,
    }

    #[tokio::test]
    async fn test_generate_json_extracts_payload() {
        let model = Arc::new(ScriptedModel::new());
        model.push_chat("Sure thing!\n```json\n{\"choice\": [\"a\", \"b\", \"c\"]}\n```");

        let parsed: Choices = gateway(&model)
            .generate_json(vec![ChatMessage::user("options")], serde_json::json!({}), 150, 0.6)
            .await
            .unwrap();
        assert_eq!(parsed.choice, vec!["a", "b", "c"]);

        let request = model.chat_requests().pop().unwrap();
        assert!(request.format.is_some());
        assert_eq!(request.max_tokens, Some(150));
    }

    #[tokio::test]
    async fn test_generate_json_parse_failure() {
        let model = Arc::new(ScriptedModel::new());
        model.push_chat("I would rather tell you a story.");

        let result: Result<Choices, _> = gateway(&model)
            .generate_json(vec![ChatMessage::user("options")], serde_json::json!({}), 150, 0.6)
            .await;
        assert!(matches!(result, Err(GatewayError::SchemaParse(_))));
        assert_eq!(model.chat_calls(), 1);
    }
}
