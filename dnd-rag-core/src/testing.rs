//! Testing utilities for the turn engine.
//!
//! This module provides deterministic doubles for every seam:
//! - `ScriptedModel` replays queued model replies and counts calls
//! - `HashEmbedder` embeds text by hashing words, no model needed
//! - `CountingStore` records retrieval traffic and returns canned passages
//! - `TestHarness` wires a `TurnEngine` to the doubles

use crate::config::GameConfig;
use crate::engine::{EngineError, TurnEngine};
use crate::gateway::{ChatMessage, ChatRequest, GenerateRequest, LanguageModel, ModelError, RetryPolicy};
use crate::party::Character;
use crate::rag::{
    Chunker, Embedder, InMemoryIndex, Passage, RagStore, RetrievalError, RetrievalStore,
    SourceKind, SourceTag,
};
use crate::state::Phase;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Reply used when the generate queue is empty.
pub const DEFAULT_NARRATIVE: &str = "The story continues.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A language model that replays scripted replies.
///
/// Generate and chat calls draw from separate queues. An empty generate
/// queue answers [`DEFAULT_NARRATIVE`]; an empty chat queue fails with
/// [`ModelError::Unavailable`], so a test that forgets to script structured
/// output fails loudly.
#[derive(Default)]
pub struct ScriptedModel {
    generate_replies: Mutex<VecDeque<Result<String, ModelError>>>,
    chat_replies: Mutex<VecDeque<Result<String, ModelError>>>,
    pull_replies: Mutex<VecDeque<Result<(), ModelError>>>,
    prompts: Mutex<Vec<String>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    generate_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    pull_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next generate call.
    pub fn push_text(&self, text: impl Into<String>) {
        lock(&self.generate_replies).push_back(Ok(text.into()));
    }

    pub fn push_generate_error(&self, err: ModelError) {
        lock(&self.generate_replies).push_back(Err(err));
    }

    /// Queue a reply for the next chat call.
    pub fn push_chat(&self, text: impl Into<String>) {
        lock(&self.chat_replies).push_back(Ok(text.into()));
    }

    pub fn push_chat_error(&self, err: ModelError) {
        lock(&self.chat_replies).push_back(Err(err));
    }

    /// Queue a failure for the next pull. Pulls succeed by default.
    pub fn push_pull_error(&self, err: ModelError) {
        lock(&self.pull_replies).push_back(Err(err));
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    /// Prompts of every generate call, in order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    /// Every chat request, in order.
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        lock(&self.chat_requests).clone()
    }

    /// Messages of the most recent chat request.
    pub fn last_chat(&self) -> Option<Vec<ChatMessage>> {
        lock(&self.chat_requests).last().map(|r| r.messages.clone())
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(request.prompt);
        lock(&self.generate_replies)
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_NARRATIVE.to_string()))
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, ModelError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.chat_requests).push(request);
        lock(&self.chat_replies)
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Unavailable("no scripted chat reply".into())))
    }

    async fn pull(&self) -> Result<(), ModelError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.pull_replies).pop_front().unwrap_or(Ok(()))
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase word is hashed (FNV-1a) into one of [`HashEmbedder::DIMENSIONS`]
/// buckets; the vector is L2-normalized. Texts sharing words score higher.
#[derive(Debug, Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub const DIMENSIONS: usize = 128;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embed_one(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; Self::DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) % Self::DIMENSIONS as u64;
            vector[bucket as usize] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|text| Self::embed_one(text)).collect())
    }
}

/// A retrieval store that records its traffic.
#[derive(Default)]
pub struct CountingStore {
    passages: Vec<Passage>,
    failing: bool,
    stored: Mutex<Vec<(String, SourceTag)>>,
    seeds: Mutex<Vec<String>>,
    query_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    narrative_reset_calls: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Passages returned (up to the limit) by every query.
    pub fn with_passages(mut self, passages: Vec<Passage>) -> Self {
        self.passages = passages;
        self
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    pub fn narrative_reset_calls(&self) -> usize {
        self.narrative_reset_calls.load(Ordering::SeqCst)
    }

    /// Seeds of every query, in order.
    pub fn seeds(&self) -> Vec<String> {
        lock(&self.seeds).clone()
    }

    /// Everything currently stored, in write order.
    pub fn stored(&self) -> Vec<(String, SourceTag)> {
        lock(&self.stored).clone()
    }

    fn check(&self) -> Result<(), RetrievalError> {
        if self.failing {
            Err(RetrievalError::Index("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RetrievalStore for CountingStore {
    async fn store(&self, text: &str, tag: SourceTag) -> Result<usize, RetrievalError> {
        self.check()?;
        lock(&self.stored).push((text.to_string(), tag));
        Ok(1)
    }

    async fn query(&self, seed: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.seeds).push(seed.to_string());
        self.check()?;
        Ok(self.passages.iter().take(limit).cloned().collect())
    }

    async fn reset(&self) -> Result<(), RetrievalError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        lock(&self.stored).clear();
        Ok(())
    }

    async fn reset_narrative(&self) -> Result<(), RetrievalError> {
        self.narrative_reset_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        lock(&self.stored).retain(|(_, tag)| tag.kind != SourceKind::Narrative);
        Ok(())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        self.check()?;
        Ok(lock(&self.stored).len())
    }
}

/// A complete character as the model would return it.
pub fn character_json(name: &str) -> String {
    serde_json::json!({
        "name": name,
        "race": "Elf",
        "class": "Ranger",
        "backstory": format!("{name} grew up guarding the border woods."),
        "items": ["longbow", "rope"],
        "personality": "Watchful and dry-humored"
    })
    .to_string()
}

/// The character described by [`character_json`].
pub fn sample_character(name: &str) -> Character {
    Character {
        name: name.to_string(),
        race: "Elf".to_string(),
        class_name: "Ranger".to_string(),
        backstory: format!("{name} grew up guarding the border woods."),
        items: vec!["longbow".to_string(), "rope".to_string()],
        personality: "Watchful and dry-humored".to_string(),
    }
}

/// Names used by [`TestHarness::play_to_choice`].
pub const PARTY_NAMES: &[&str] = &["Aria", "Bram", "Cyra", "Dain", "Esk", "Fen", "Gwyn", "Hale"];

/// Test harness for running scripted sessions.
///
/// Retries are immediate and query reformulation is off, so every model call
/// made by the engine corresponds to one scripted reply.
pub struct TestHarness {
    /// The engine under test.
    pub engine: TurnEngine,
    /// The scripted model behind the engine.
    pub model: Arc<ScriptedModel>,
    /// The store behind the engine.
    pub store: Arc<dyn RetrievalStore>,
}

impl TestHarness {
    /// Harness with default configuration and an in-memory store.
    pub fn new() -> Self {
        Self::with_config(GameConfig::default())
    }

    pub fn with_config(config: GameConfig) -> Self {
        let store = RagStore::new(Arc::new(InMemoryIndex::new()), Arc::new(HashEmbedder::new()))
            .with_chunker(Chunker::new(config.chunk_size, config.chunk_overlap));
        Self::with_store(config, Arc::new(store))
    }

    /// Harness over a caller-provided store, e.g. a [`CountingStore`].
    pub fn with_store(config: GameConfig, store: Arc<dyn RetrievalStore>) -> Self {
        let config = config
            .with_transport_retry(RetryPolicy::immediate(3))
            .with_schema_retry(RetryPolicy::immediate(3));
        let model = Arc::new(ScriptedModel::new());
        let engine = TurnEngine::new(config, model.clone(), store.clone());
        Self {
            engine,
            model,
            store,
        }
    }

    /// Script one character reply per name.
    pub fn expect_party(&self, names: &[&str]) -> &Self {
        for name in names {
            self.model.push_chat(character_json(name));
        }
        self
    }

    /// Script the next free-form narration.
    pub fn expect_narrative(&self, text: impl Into<String>) -> &Self {
        self.model.push_text(text);
        self
    }

    /// Script the next option reply.
    pub fn expect_options(&self, options: &[&str]) -> &Self {
        self.model
            .push_chat(serde_json::json!({ "choice": options }).to_string());
        self
    }

    /// Script the next chat answer.
    pub fn expect_answer(&self, text: impl Into<String>) -> &Self {
        self.model.push_chat(text);
        self
    }

    /// Create a party, start the adventure and request options.
    pub async fn play_to_choice(&mut self) -> Result<(), EngineError> {
        let count = self.engine.config().player_count;
        let names: Vec<&str> = PARTY_NAMES.iter().copied().cycle().take(count).collect();
        self.expect_party(&names);
        self.engine.new_party().await?;

        self.expect_narrative("You stand at the mouth of a cave. Something growls within.");
        self.engine.start_adventure().await?;

        self.expect_options(&["Enter the cave", "Light a torch", "Call out"]);
        self.engine.request_options().await?;
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert the engine is in the given phase.
#[track_caller]
pub fn assert_phase(harness: &TestHarness, phase: Phase) {
    let actual = harness.engine.state().phase;
    assert_eq!(actual, phase, "expected phase {phase}, found {actual}");
}

/// Assert the turn counter.
#[track_caller]
pub fn assert_turn(harness: &TestHarness, turn: u32) {
    let actual = harness.engine.state().turn;
    assert_eq!(actual, turn, "expected turn {turn}, found {actual}");
}

/// Assert the story's last line.
#[track_caller]
pub fn assert_last_line(harness: &TestHarness, line: &str) {
    let actual = harness.engine.state().last_line();
    assert_eq!(actual, Some(line), "unexpected last story line");
}
