//! Turn engine for LLM-narrated role-playing sessions.
//!
//! This crate provides:
//! - A phase state machine sequencing party creation, the opening scene,
//!   option generation, player choices and DM continuations
//! - Bounded prompt context built from recent story plus retrieved lore
//! - A retrieval store with overlapping chunking and two-hop queries
//! - A generation gateway with transport retries, model provisioning and
//!   defensive JSON extraction
//! - Session snapshots for save/load
//!
//! # Quick Start
//!
//! ```ignore
//! use dnd_rag_core::{GameConfig, TurnEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = TurnEngine::with_ollama(GameConfig::from_env()?)?;
//!
//!     engine.new_party().await?;
//!     engine.start_adventure().await?;
//!     engine.request_options().await?;
//!     engine.process_player_choice(Some(0), None).await?;
//!     let state = engine.run_dm_turn().await?;
//!     println!("{}", state.story.last().unwrap());
//!
//!     engine.snapshot().save("session.json").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod gateway;
pub mod options;
pub mod party;
pub mod persist;
pub mod prompts;
pub mod rag;
pub mod state;
pub mod testing;

// Primary public API
pub use config::{ConfigError, GameConfig, LorePolicy};
pub use context::{last_sentences, AssembledContext, ContextAssembler, ContextRole};
pub use engine::{EngineError, TurnEngine};
pub use gateway::{extract_json, Gateway, GatewayError, LanguageModel, ModelError, RetryPolicy};
pub use options::{OptionGenerator, OPTION_COUNT};
pub use party::{Character, Party, PartyGenerator, PartyMember};
pub use persist::{PersistError, SessionSnapshot};
pub use rag::{
    Embedder, InMemoryIndex, LoreLibrary, Passage, RagStore, RetrievalError, RetrievalStore,
    SourceKind, SourceTag,
};
pub use state::{Phase, SessionState};
pub use testing::{CountingStore, HashEmbedder, ScriptedModel, TestHarness};
