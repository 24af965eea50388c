//! Minimal Ollama HTTP API client.
//!
//! This crate provides a focused client for a local or remote Ollama host:
//! - Text completion (`/api/generate`)
//! - Chat completion with optional JSON-schema constrained output (`/api/chat`)
//! - Batch embeddings (`/api/embed`)
//! - Model provisioning (`/api/pull`)
//!
//! There are no retries here. Callers decide which failures are transient
//! and how long to back off, using [`Error::is_transient`].

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "gemma3";
const DEFAULT_EMBEDDING_MODEL: &str = "embeddinggemma:latest";

/// Errors that can occur when using the Ollama client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether a retry of the same request may succeed.
    ///
    /// Connection failures, rate limiting and server-side errors are
    /// transient; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Ollama API client.
#[derive(Clone)]
pub struct Ollama {
    client: reqwest::Client,
    host: String,
    model: String,
    embedding_model: String,
}

impl Ollama {
    /// Create a new client for the given host, e.g. `http://127.0.0.1:11434`.
    pub fn new(host: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        })
    }

    /// Create a client from the `LLM_HOST`, `LLM_MODEL` and
    /// `LLM_EMBEDDING_MODEL` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let host = std::env::var("LLM_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let mut client = Self::new(host)?;
        if let Ok(model) = std::env::var("LLM_MODEL") {
            client = client.with_model(model);
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            client = client.with_embedding_model(model);
        }
        Ok(client)
    }

    /// Set the default generation model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the default embedding model for this client.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// The default generation model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The default embedding model.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// The host this client talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run a single, non-streaming text completion.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, Error> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = ApiGenerateRequest {
            model: &model,
            prompt: &request.prompt,
            stream: false,
            options: ApiOptions::from_sampling(request.temperature, request.max_tokens),
        };

        let response: ApiGenerateResponse = self.post("generate", &model, &body).await?;
        Ok(GenerateResponse {
            model: response.model,
            text: response.response,
        })
    }

    /// Run a single, non-streaming chat completion.
    ///
    /// When `request.format` carries a JSON schema, the host constrains
    /// decoding to that schema; the text may still need defensive parsing.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let messages: Vec<ApiChatMessage> = request
            .messages
            .iter()
            .map(|m| ApiChatMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let body = ApiChatRequest {
            model: &model,
            messages,
            stream: false,
            format: request.format.as_ref(),
            options: ApiOptions::from_sampling(request.temperature, request.max_tokens),
        };

        let response: ApiChatResponse = self.post("chat", &model, &body).await?;
        Ok(ChatResponse {
            model: response.model,
            text: response.message.content,
        })
    }

    /// Embed a batch of inputs with the configured embedding model.
    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.embedding_model.clone();
        let body = ApiEmbedRequest {
            model: &model,
            input: inputs,
        };

        let response: ApiEmbedResponse = self.post("embed", &model, &body).await?;
        if response.embeddings.len() != inputs.len() {
            return Err(Error::Parse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }

    /// Download a model onto the host, blocking until the pull completes.
    pub async fn pull(&self, model: &str) -> Result<(), Error> {
        let body = ApiPullRequest {
            model,
            stream: false,
        };

        let response: ApiPullResponse = self.post("pull", model, &body).await?;
        if response.status != "success" {
            return Err(Error::Api {
                status: 200,
                message: format!("pull of {model} ended with status {}", response.status),
            });
        }
        Ok(())
    }

    async fn post<B, R>(&self, endpoint: &str, model: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(format!("{}/api/{endpoint}", self.host))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, model, body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }
}

fn classify_failure(status: StatusCode, model: &str, body: String) -> Error {
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or(body);

    if status == StatusCode::NOT_FOUND && message.to_lowercase().contains("not found") {
        return Error::ModelNotFound(model.to_string());
    }

    Error::Api {
        status: status.as_u16(),
        message,
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A text completion request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completed text generation.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub model: String,
    pub text: String,
}

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub format: Option<serde_json::Value>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            format: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Constrain the output to a JSON schema.
    pub fn with_format(mut self, schema: serde_json::Value) -> Self {
        self.format = Some(schema);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A message in a chat conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A completed chat turn.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub model: String,
    pub text: String,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

impl ApiOptions {
    fn from_sampling(temperature: Option<f32>, max_tokens: Option<usize>) -> Option<Self> {
        if temperature.is_none() && max_tokens.is_none() {
            return None;
        }
        Some(Self {
            temperature,
            num_predict: max_tokens,
        })
    }
}

#[derive(Debug, Serialize)]
struct ApiGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ApiOptions>,
}

#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    model: String,
    response: String,
}

#[derive(Debug, Serialize)]
struct ApiChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ApiOptions>,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    model: String,
    message: ApiChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponseMessage {
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ApiEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct ApiPullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ApiPullResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Ollama::new("http://localhost:11434/").unwrap();
        assert_eq!(client.host(), "http://localhost:11434");
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.embedding_model(), DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_client_with_models() {
        let client = Ollama::new(DEFAULT_HOST)
            .unwrap()
            .with_model("llama3")
            .with_embedding_model("nomic-embed-text");
        assert_eq!(client.model(), "llama3");
        assert_eq!(client.embedding_model(), "nomic-embed-text");
    }

    #[test]
    fn test_request_builders() {
        let request = GenerateRequest::new("Once upon a time")
            .with_max_tokens(150)
            .with_temperature(0.6);
        assert_eq!(request.max_tokens, Some(150));
        assert_eq!(request.temperature, Some(0.6));

        let chat = ChatRequest::new(vec![
            ChatMessage::system("You are the Dungeon Master."),
            ChatMessage::user("Where am I?"),
        ])
        .with_format(serde_json::json!({"type": "object"}));
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, Role::System);
        assert!(chat.format.is_some());
    }

    #[test]
    fn test_options_omitted_when_unset() {
        assert!(ApiOptions::from_sampling(None, None).is_none());

        let options = ApiOptions::from_sampling(Some(0.8), Some(3000)).unwrap();
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["num_predict"], 3000);
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify_failure(
            StatusCode::NOT_FOUND,
            "gemma3",
            r#"{"error":"model 'gemma3' not found"}"#.to_string(),
        );
        assert!(matches!(err, Error::ModelNotFound(ref m) if m == "gemma3"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("connection refused".into()).is_transient());
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "m", String::new()).is_transient());
        assert!(classify_failure(StatusCode::BAD_GATEWAY, "m", String::new()).is_transient());
        assert!(!classify_failure(StatusCode::BAD_REQUEST, "m", String::new()).is_transient());
        assert!(!Error::ModelNotFound("m".into()).is_transient());
    }
}
