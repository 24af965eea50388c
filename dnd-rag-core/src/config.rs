//! Game configuration.

use crate::gateway::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors from reading or validating configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Constraint(String),
}

/// What happens to stored lore when a new party is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LorePolicy {
    /// Only narrative is cleared; uploaded lore survives.
    #[default]
    Retain,
    /// The whole store is cleared.
    Clear,
}

impl FromStr for LorePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" | "keep" => Ok(LorePolicy::Retain),
            "clear" => Ok(LorePolicy::Clear),
            _ => Err(()),
        }
    }
}

/// Configuration consumed by the turn engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Base URL of the model host.
    pub llm_host: String,

    /// Generation model.
    pub llm_model: String,

    /// Embedding model.
    pub embedding_model: String,

    /// Party size for new parties.
    pub player_count: usize,

    /// Reported against `turn`; the engine never refuses on it.
    pub turn_limit: u32,

    /// Target chunk length in characters.
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,

    /// Whether prompts are supplemented with retrieved passages.
    pub enable_rag: bool,

    /// Sentences of recent story included in each prompt.
    pub recent_sentences: usize,

    /// Passages fetched per retrieval.
    pub retrieval_limit: usize,

    /// Similarity floor for retrieved passages.
    pub min_similarity: f32,

    pub lore_policy: LorePolicy,

    /// Rewrite retrieval seeds as questions before searching.
    pub reformulate_queries: bool,

    pub transport_retry: RetryPolicy,

    pub schema_retry: RetryPolicy,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            llm_host: "http://127.0.0.1:11434".to_string(),
            llm_model: "gemma3".to_string(),
            embedding_model: "embeddinggemma:latest".to_string(),
            player_count: 4,
            turn_limit: 10,
            chunk_size: 500,
            chunk_overlap: 50,
            enable_rag: true,
            recent_sentences: 10,
            retrieval_limit: 5,
            min_similarity: 0.0,
            lore_policy: LorePolicy::Retain,
            reformulate_queries: true,
            transport_retry: RetryPolicy::transport(),
            schema_retry: RetryPolicy::schema(),
        }
    }
}

impl GameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the process environment.
    ///
    /// Unset keys keep their defaults. The result is validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("LLM_HOST") {
            config.llm_host = host;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            config.llm_model = model;
        }
        if let Some(model) = lookup("LLM_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Some(v) = parsed(&lookup, "PLAYER_COUNT")? {
            config.player_count = v;
        }
        if let Some(v) = parsed(&lookup, "TURN_LIMIT")? {
            config.turn_limit = v;
        }
        if let Some(v) = parsed(&lookup, "CHUNK_SIZE")? {
            config.chunk_size = v;
        }
        if let Some(v) = parsed(&lookup, "CHUNK_OVERLAP")? {
            config.chunk_overlap = v;
        }
        if let Some(raw) = lookup("ENABLE_RAG") {
            config.enable_rag = parse_bool(&raw).ok_or_else(|| invalid("ENABLE_RAG", &raw))?;
        }
        if let Some(raw) = lookup("LORE_POLICY") {
            config.lore_policy = raw.parse().map_err(|_| invalid("LORE_POLICY", &raw))?;
        }
        if let Some(v) = parsed(&lookup, "RECENT_SENTENCES")? {
            config.recent_sentences = v;
        }
        if let Some(v) = parsed(&lookup, "RETRIEVAL_LIMIT")? {
            config.retrieval_limit = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Constraint("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Constraint(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.player_count == 0 {
            return Err(ConfigError::Constraint("player_count must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.llm_host = host.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.llm_model = model.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_player_count(mut self, count: usize) -> Self {
        self.player_count = count;
        self
    }

    pub fn with_turn_limit(mut self, limit: u32) -> Self {
        self.turn_limit = limit;
        self
    }

    pub fn with_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.chunk_size = size;
        self.chunk_overlap = overlap;
        self
    }

    pub fn with_rag(mut self, enabled: bool) -> Self {
        self.enable_rag = enabled;
        self
    }

    pub fn with_recent_sentences(mut self, sentences: usize) -> Self {
        self.recent_sentences = sentences;
        self
    }

    pub fn with_retrieval_limit(mut self, limit: usize) -> Self {
        self.retrieval_limit = limit;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_lore_policy(mut self, policy: LorePolicy) -> Self {
        self.lore_policy = policy;
        self
    }

    pub fn with_query_reformulation(mut self, enabled: bool) -> Self {
        self.reformulate_queries = enabled;
        self
    }

    pub fn with_transport_retry(mut self, policy: RetryPolicy) -> Self {
        self.transport_retry = policy;
        self
    }

    pub fn with_schema_retry(mut self, policy: RetryPolicy) -> Self {
        self.schema_retry = policy;
        self
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| invalid(key, &raw)),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
