//! The Turn Engine: phase state machine and sole owner of session state.
//!
//! Every operation follows the same shape: check the precondition, do all
//! model and retrieval work, then mutate state in one step at the end. A
//! failed operation therefore leaves the session exactly as it was.
//!
//! | Operation | Allowed in | Moves to |
//! |---|---|---|
//! | [`new_party`](TurnEngine::new_party) | any | `start`, turn 0 |
//! | [`start_adventure`](TurnEngine::start_adventure) | `start` with a party | `intro`, turn 1 |
//! | [`request_options`](TurnEngine::request_options) | `intro`, `dm_response` | `choice` |
//! | [`process_player_choice`](TurnEngine::process_player_choice) | `choice` | `choice` |
//! | [`run_dm_turn`](TurnEngine::run_dm_turn) | `choice` after a player action | `dm_response`, turn + 1 |
//! | [`ask_dm`](TurnEngine::ask_dm) | any | unchanged |

use crate::config::{ConfigError, GameConfig, LorePolicy};
use crate::context::{ContextAssembler, ContextRole};
use crate::gateway::{Gateway, GatewayError, LanguageModel};
use crate::options::OptionGenerator;
use crate::party::{Party, PartyGenerator};
use crate::persist::SessionSnapshot;
use crate::prompts;
use crate::rag::{Chunker, InMemoryIndex, LoreLibrary, RagStore, RetrievalStore, SourceTag};
use crate::state::{Phase, SessionState, DM_PREFIX, PLAYER_PREFIX};
use ollama::Ollama;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from turn engine operations. The session is unchanged after any of them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot {operation} during phase {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: Phase,
    },

    #[error("Invalid choice: {0}")]
    InvalidChoice(String),

    #[error("No party has been created")]
    NoParty,

    #[error("No party member in slot {0:?}")]
    UnknownMember(String),

    #[error("Empty {0}")]
    EmptyInput(&'static str),

    #[error("Generation failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Drives one session. Not meant for concurrent mutation; callers serialize access.
pub struct TurnEngine {
    config: GameConfig,
    state: SessionState,
    party: Option<Party>,
    gateway: Gateway,
    store: Arc<dyn RetrievalStore>,
    assembler: ContextAssembler,
    party_generator: PartyGenerator,
    option_generator: OptionGenerator,
}

impl TurnEngine {
    /// Create an engine over injected model and store handles.
    pub fn new(
        config: GameConfig,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn RetrievalStore>,
    ) -> Self {
        let gateway = Gateway::new(model).with_retry(config.transport_retry);
        Self::with_gateway(config, gateway, store)
    }

    /// Create an engine talking to the Ollama host named in `config`, with
    /// an in-memory vector index.
    pub fn with_ollama(config: GameConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let client = Ollama::new(config.llm_host.clone())
            .map_err(|e| GatewayError::ModelUnavailable(e.to_string()))?
            .with_model(config.llm_model.clone())
            .with_embedding_model(config.embedding_model.clone());
        let client = Arc::new(client);

        let gateway = Gateway::new(client.clone()).with_retry(config.transport_retry);
        let mut store = RagStore::new(Arc::new(InMemoryIndex::new()), client)
            .with_chunker(Chunker::new(config.chunk_size, config.chunk_overlap))
            .with_min_similarity(config.min_similarity);
        if config.reformulate_queries {
            store = store.with_reformulation(gateway.clone());
        }

        Ok(Self::with_gateway(config, gateway, Arc::new(store)))
    }

    fn with_gateway(config: GameConfig, gateway: Gateway, store: Arc<dyn RetrievalStore>) -> Self {
        Self {
            assembler: ContextAssembler::new(store.clone(), &config),
            party_generator: PartyGenerator::new(gateway.clone(), config.schema_retry),
            option_generator: OptionGenerator::new(gateway.clone(), config.schema_retry),
            state: SessionState::new(),
            party: None,
            gateway,
            store,
            config,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn party(&self) -> Option<&Party> {
        self.party.as_ref()
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// The retrieval store narrative is written to.
    pub fn store(&self) -> &Arc<dyn RetrievalStore> {
        &self.store
    }

    /// Lore loader writing into this engine's store.
    pub fn lore(&self) -> LoreLibrary {
        LoreLibrary::new(self.store.clone())
    }

    /// Generate a fresh party and reset the session to `start`.
    ///
    /// Stored narrative is cleared; lore is kept or cleared per
    /// [`LorePolicy`]. A failed generation leaves the old session intact.
    pub async fn new_party(&mut self) -> Result<&Party, EngineError> {
        let party = self
            .party_generator
            .generate_party(self.config.player_count)
            .await?;

        let reset = match self.config.lore_policy {
            LorePolicy::Retain => self.store.reset_narrative().await,
            LorePolicy::Clear => self.store.reset().await,
        };
        if let Err(err) = reset {
            warn!(error = %err, "failed to reset retrieval store for new party");
        }

        self.state = SessionState::new();
        info!(members = party.len(), lore_policy = ?self.config.lore_policy, "new party created");
        Ok(&*self.party.insert(party))
    }

    /// Narrate the opening scene.
    pub async fn start_adventure(&mut self) -> Result<&SessionState, EngineError> {
        self.require(&[Phase::Start], "start the adventure")?;
        let names = self.party.as_ref().ok_or(EngineError::NoParty)?.names();

        let context = self
            .assembler
            .assemble(&self.state.story, ContextRole::DmIntro)
            .await;
        let sampling = prompts::DM_NARRATION;
        let intro = self
            .gateway
            .generate_text(
                prompts::dm_intro(&names, &context.render()),
                sampling.max_tokens,
                sampling.temperature,
            )
            .await?;
        let intro = non_empty(intro)?;

        self.record("intro".to_string(), &intro).await;

        self.state = SessionState {
            turn: 1,
            phase: Phase::Intro,
            story: vec![format!("{DM_PREFIX}{intro}")],
            intro_text: Some(intro),
            current_options: Vec::new(),
            last_choice: None,
        };
        info!(turn = self.state.turn, phase = %self.state.phase, "adventure started");
        Ok(&self.state)
    }

    /// Generate exactly three action options and enter `choice`.
    pub async fn request_options(&mut self) -> Result<&SessionState, EngineError> {
        self.require(&[Phase::Intro, Phase::DmResponse], "request options")?;

        let context = self
            .assembler
            .assemble(&self.state.story, ContextRole::DmTurn)
            .await;
        let options = self
            .option_generator
            .generate_options(&context.render())
            .await?;

        self.state.current_options = options;
        self.state.phase = Phase::Choice;
        debug!(options = ?self.state.current_options, "options offered");
        Ok(&self.state)
    }

    /// Commit a player action, either by option index (0-based) or as free text.
    ///
    /// An index, when given, must be in range and takes precedence over the
    /// text. Without an index, the text must be non-blank.
    pub async fn process_player_choice(
        &mut self,
        index: Option<usize>,
        text: Option<&str>,
    ) -> Result<&SessionState, EngineError> {
        self.require(&[Phase::Choice], "choose an action")?;

        let choice = match (index, text.map(str::trim)) {
            (Some(i), _) => self
                .state
                .current_options
                .get(i)
                .cloned()
                .ok_or_else(|| {
                    EngineError::InvalidChoice(format!(
                        "option {} out of range (have {})",
                        i + 1,
                        self.state.current_options.len()
                    ))
                })?,
            (None, Some(t)) if !t.is_empty() => t.to_string(),
            (None, _) => {
                return Err(EngineError::InvalidChoice(
                    "neither an option index nor action text was given".into(),
                ))
            }
        };

        let line = format!("{PLAYER_PREFIX}{choice}");
        self.record(format!("player_turn_{}", self.state.turn), &line)
            .await;

        self.state.story.push(line);
        self.state.last_choice = Some(choice);
        debug!(turn = self.state.turn, "player action committed");
        Ok(&self.state)
    }

    /// Continue the narrative after the committed player action.
    pub async fn run_dm_turn(&mut self) -> Result<&SessionState, EngineError> {
        self.require(&[Phase::Choice], "run the DM turn")?;
        if !self.state.awaiting_dm() {
            return Err(EngineError::InvalidTransition {
                operation: "run the DM turn before a player action",
                phase: self.state.phase,
            });
        }

        let context = self
            .assembler
            .assemble(&self.state.story, ContextRole::DmTurn)
            .await;
        let sampling = prompts::DM_NARRATION;
        let narration = self
            .gateway
            .generate_text(
                prompts::dm_turn(&context.render()),
                sampling.max_tokens,
                sampling.temperature,
            )
            .await?;
        let narration = non_empty(narration)?;

        let turn = self.state.turn + 1;
        self.record(format!("dm_turn_{turn}"), &narration).await;

        self.state.story.push(format!("{DM_PREFIX}{narration}"));
        self.state.current_options.clear();
        self.state.turn = turn;
        self.state.phase = Phase::DmResponse;
        info!(turn, remaining = self.turns_remaining(), "DM turn complete");
        Ok(&self.state)
    }

    /// Answer a player's question without touching the story.
    pub async fn ask_dm(&self, question: &str) -> Result<String, EngineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EngineError::EmptyInput("question"));
        }

        let context = self
            .assembler
            .assemble(&self.state.story, ContextRole::DmQuestion(question))
            .await;
        let sampling = prompts::DM_QUESTION;
        let answer = self
            .gateway
            .chat_text(
                prompts::dm_question(question, &context.render()),
                sampling.max_tokens,
                sampling.temperature,
            )
            .await?;
        Ok(answer.trim().to_string())
    }

    /// Have the model propose an in-character action for one party member.
    ///
    /// Nothing is committed; pass the result to
    /// [`process_player_choice`](Self::process_player_choice) to use it.
    pub async fn suggest_player_action(&self, slot: &str) -> Result<String, EngineError> {
        self.require(&[Phase::Choice], "suggest an action")?;
        let party = self.party.as_ref().ok_or(EngineError::NoParty)?;
        let character = party
            .get(slot)
            .ok_or_else(|| EngineError::UnknownMember(slot.to_string()))?;

        let context = self
            .assembler
            .assemble(&self.state.story, ContextRole::PlayerTurn(character))
            .await;
        let sampling = prompts::PLAYER_ACTION;
        let action = self
            .gateway
            .generate_text(
                prompts::player_action(&context.render()),
                sampling.max_tokens,
                sampling.temperature,
            )
            .await?;
        non_empty(action)
    }

    /// Turns left before the configured limit. Informational only.
    pub fn turns_remaining(&self) -> u32 {
        self.config.turn_limit.saturating_sub(self.state.turn)
    }

    pub fn turn_limit_reached(&self) -> bool {
        self.state.turn >= self.config.turn_limit
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(self.state.clone(), self.party.clone())
    }

    /// Replace the session with a snapshot, or with a fresh one when `None`.
    ///
    /// Stored narrative is rebuilt from the restored story so retrieval
    /// keeps working; lore in the store is left alone.
    pub async fn restore(&mut self, snapshot: Option<SessionSnapshot>) -> &SessionState {
        let (state, party) = match snapshot {
            Some(snapshot) => (snapshot.state, snapshot.party),
            None => (SessionState::new(), None),
        };

        if let Err(err) = self.store.reset_narrative().await {
            warn!(error = %err, "failed to clear narrative before restore");
        }
        for (n, line) in state.story.iter().enumerate() {
            self.record(format!("restored_{n}"), line).await;
        }

        self.state = state;
        self.party = party;
        info!(turn = self.state.turn, phase = %self.state.phase, "session restored");
        &self.state
    }

    fn require(&self, allowed: &[Phase], operation: &'static str) -> Result<(), EngineError> {
        if allowed.contains(&self.state.phase) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                operation,
                phase: self.state.phase,
            })
        }
    }

    /// Write narrative to the store. Failures are logged, never fatal.
    async fn record(&self, label: String, text: &str) {
        match self.store.store(text, SourceTag::narrative(label.as_str())).await {
            Ok(chunks) => debug!(label = %label, chunks, "narrative stored"),
            Err(err) => warn!(label = %label, error = %err, "failed to store narrative"),
        }
    }
}

fn non_empty(text: String) -> Result<String, EngineError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(GatewayError::ModelUnavailable("model returned no text".into()).into());
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;

    #[tokio::test]
    async fn test_start_requires_party() {
        let mut harness = TestHarness::new();
        let err = harness.engine.start_adventure().await.unwrap_err();
        assert!(matches!(err, EngineError::NoParty));
        assert_eq!(harness.engine.state(), &SessionState::new());
    }

    #[tokio::test]
    async fn test_run_dm_turn_needs_player_action() {
        let mut harness = TestHarness::new();
        harness.play_to_choice().await.unwrap();

        let err = harness.engine.run_dm_turn().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { phase: Phase::Choice, .. }));
        assert_eq!(harness.engine.state().turn, 1);
    }

    #[tokio::test]
    async fn test_blank_narration_leaves_state() {
        let mut harness = TestHarness::with_config(GameConfig::default().with_player_count(1));
        harness.expect_party(&["Aria"]);
        harness.engine.new_party().await.unwrap();

        harness.expect_narrative("   ");
        let err = harness.engine.start_adventure().await.unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::ModelUnavailable(_))));
        assert_eq!(harness.engine.state().phase, Phase::Start);
    }

    #[tokio::test]
    async fn test_turn_limit_reporting() {
        let mut harness = TestHarness::with_config(GameConfig::default().with_turn_limit(2));
        assert_eq!(harness.engine.turns_remaining(), 2);

        harness.play_to_choice().await.unwrap();
        harness.engine.process_player_choice(Some(0), None).await.unwrap();
        harness.expect_narrative("The bridge holds.");
        harness.engine.run_dm_turn().await.unwrap();

        assert_eq!(harness.engine.state().turn, 2);
        assert!(harness.engine.turn_limit_reached());
        assert_eq!(harness.engine.turns_remaining(), 0);

        // Reaching the limit does not block play.
        harness.expect_options(&["Rest", "Search", "Leave"]);
        harness.engine.request_options().await.unwrap();
        assert_eq!(harness.engine.state().phase, Phase::Choice);
    }
}
