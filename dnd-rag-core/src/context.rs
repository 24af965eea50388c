//! Context Assembler: builds the bounded prompt context for each role.
//!
//! Every context is made of at most three sections, in this order:
//!
//! ```text
//! Character: {json}                 (player turns only)
//! Recent events: {last k sentences}
//! Additional Backstory: {p1} | {p2} (only when retrieval found something)
//! ```
//!
//! The size depends on `k` and the retrieval limit, never on how long the
//! story has grown.

use crate::config::GameConfig;
use crate::party::Character;
use crate::rag::{Passage, RetrievalStore};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Who the context is being assembled for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContextRole<'a> {
    /// Opening scene. Never retrieves.
    DmIntro,
    /// DM continuation, also used for option generation.
    DmTurn,
    /// A party member deciding on an action.
    PlayerTurn(&'a Character),
    /// A side-channel question to the DM.
    DmQuestion(&'a str),
}

impl ContextRole<'_> {
    fn name(&self) -> &'static str {
        match self {
            ContextRole::DmIntro => "dm_intro",
            ContextRole::DmTurn => "dm_turn",
            ContextRole::PlayerTurn(_) => "player_turn",
            ContextRole::DmQuestion(_) => "dm_question",
        }
    }
}

/// The pieces of an assembled context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    /// Character sheet as JSON, for player turns.
    pub character: Option<String>,
    /// The last `k` sentences of the story.
    pub recent: String,
    /// Retrieved passages, most relevant first.
    pub passages: Vec<Passage>,
}

impl AssembledContext {
    pub fn render(&self) -> String {
        let mut sections = Vec::with_capacity(3);
        if let Some(character) = &self.character {
            sections.push(format!("Character: {character}"));
        }
        if !self.recent.is_empty() {
            sections.push(format!("Recent events: {}", self.recent));
        }
        if !self.passages.is_empty() {
            let lore: Vec<&str> = self.passages.iter().map(|p| p.text.as_str()).collect();
            sections.push(format!("Additional Backstory: {}", lore.join(" | ")));
        }
        sections.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.character.is_none() && self.recent.is_empty() && self.passages.is_empty()
    }
}

impl fmt::Display for AssembledContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Builds [`AssembledContext`] values from the story and the retrieval store.
#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn RetrievalStore>,
    recent_sentences: usize,
    retrieval_limit: usize,
    enable_rag: bool,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn RetrievalStore>, config: &GameConfig) -> Self {
        Self {
            store,
            recent_sentences: config.recent_sentences,
            retrieval_limit: config.retrieval_limit,
            enable_rag: config.enable_rag,
        }
    }

    /// Assemble context for `role` from the full story.
    ///
    /// Retrieval failures are logged and treated as "no passages".
    pub async fn assemble(&self, story: &[String], role: ContextRole<'_>) -> AssembledContext {
        let joined = story.join("\n");
        let recent = last_sentences(&joined, self.recent_sentences).to_string();

        let character = match role {
            ContextRole::PlayerTurn(c) => serde_json::to_string(c).ok(),
            _ => None,
        };

        let seed = match role {
            ContextRole::DmIntro => None,
            ContextRole::DmTurn => Some(recent.clone()),
            ContextRole::PlayerTurn(c) => Some(join_nonempty(&recent, &c.backstory)),
            ContextRole::DmQuestion(q) => Some(join_nonempty(q, &recent)),
        };

        let passages = match seed {
            Some(seed) if self.enable_rag && self.retrieval_limit > 0 && !seed.is_empty() => {
                match self.store.query(&seed, self.retrieval_limit).await {
                    Ok(passages) => passages,
                    Err(err) => {
                        warn!(role = role.name(), error = %err, "retrieval failed, continuing without lore");
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        debug!(
            role = role.name(),
            recent_chars = recent.len(),
            passages = passages.len(),
            "assembled context"
        );

        AssembledContext {
            character,
            recent,
            passages,
        }
    }
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.trim().is_empty(), b.trim().is_empty()) {
        (true, _) => b.trim().to_string(),
        (_, true) => a.trim().to_string(),
        _ => format!("{}\n{}", a.trim(), b.trim()),
    }
}

/// Byte offsets at which sentences begin in `text`.
///
/// A sentence ends at `.`, `!` or `?` (optionally followed by closing quotes
/// or brackets) when whitespace follows, and at every line break.
fn sentence_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    let mut after_terminal = false;
    let mut boundary = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if after_terminal || c == '\n' {
                boundary = true;
            }
            after_terminal = false;
            continue;
        }
        if boundary {
            starts.push(i);
            boundary = false;
        }
        after_terminal = matches!(c, '.' | '!' | '?')
            || (after_terminal && matches!(c, '"' | '\'' | ')' | '\u{201d}' | '\u{2019}'));
    }

    starts
}

/// Split text into trimmed sentences.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let starts = sentence_starts(text);
    let mut sentences = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(text.len());
        sentences.push(text[start..end].trim());
    }
    sentences
}

/// The last `k` sentences of `text`, as a suffix of the trimmed input.
pub fn last_sentences(text: &str, k: usize) -> &str {
    let text = text.trim();
    if k == 0 || text.is_empty() {
        return "";
    }

    let starts = sentence_starts(text);
    if starts.len() <= k {
        text
    } else {
        &text[starts[starts.len() - k]..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::SourceTag;
    use crate::testing::{sample_character, CountingStore};

    fn passage(text: &str) -> Passage {
        Passage {
            text: text.to_string(),
            source: SourceTag::lore("atlas"),
            score: 0.9,
        }
    }

    fn story(lines: usize) -> Vec<String> {
        (1..=lines).map(|n| format!("DM: Event number {n} happens.")).collect()
    }

    #[test]
    fn test_last_sentences_keeps_everything_when_short() {
        let joined = story(3).join("\n");
        assert_eq!(last_sentences(&joined, 10), joined);
    }

    #[test]
    fn test_last_sentences_takes_suffix() {
        let joined = story(15).join("\n");
        let recent = last_sentences(&joined, 10);

        assert_eq!(split_sentences(recent).len(), 10);
        assert!(joined.ends_with(recent));
        assert!(recent.starts_with("DM: Event number 6 happens."));
    }

    #[test]
    fn test_sentences_within_one_line() {
        let text = "DM: The door creaks. A cold wind blows! Who goes there? Silence.";
        assert_eq!(last_sentences(text, 2), "Who goes there? Silence.");
        assert_eq!(split_sentences(text).len(), 4);
    }

    #[test]
    fn test_sentence_edge_cases() {
        assert_eq!(split_sentences("The potion costs 2.5 gold."), vec!["The potion costs 2.5 gold."]);
        assert_eq!(
            split_sentences("He shouts \"Run!\" The bridge falls."),
            vec!["He shouts \"Run!\"", "The bridge falls."]
        );
        assert_eq!(last_sentences("   ", 3), "");
        assert_eq!(last_sentences("One. Two.", 0), "");
    }

    #[test]
    fn test_render_sections() {
        let context = AssembledContext {
            character: None,
            recent: "The gate is shut.".into(),
            passages: vec![passage("Gates open at dawn."), passage("Guards take bribes.")],
        };
        assert_eq!(
            context.render(),
            "Recent events: The gate is shut.\nAdditional Backstory: Gates open at dawn. | Guards take bribes."
        );

        let bare = AssembledContext {
            recent: "The gate is shut.".into(),
            ..Default::default()
        };
        assert_eq!(bare.render(), "Recent events: The gate is shut.");
        assert!(!bare.render().contains("Additional Backstory"));
    }

    #[tokio::test]
    async fn test_rag_disabled_never_queries() {
        let store = Arc::new(CountingStore::new().with_passages(vec![passage("unused")]));
        let config = GameConfig::default().with_rag(false);
        let assembler = ContextAssembler::new(store.clone(), &config);

        let character = sample_character("Aria");
        for role in [
            ContextRole::DmTurn,
            ContextRole::PlayerTurn(&character),
            ContextRole::DmQuestion("Where are we?"),
        ] {
            let context = assembler.assemble(&story(4), role).await;
            assert!(context.passages.is_empty());
        }
        assert_eq!(store.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_intro_never_queries() {
        let store = Arc::new(CountingStore::new().with_passages(vec![passage("unused")]));
        let assembler = ContextAssembler::new(store.clone(), &GameConfig::default());

        let context = assembler.assemble(&[], ContextRole::DmIntro).await;
        assert!(context.is_empty());
        assert_eq!(store.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_player_turn_seeds_with_backstory() {
        let store = Arc::new(CountingStore::new().with_passages(vec![passage("Elves remember.")]));
        let assembler = ContextAssembler::new(store.clone(), &GameConfig::default());
        let character = sample_character("Aria");

        let context = assembler
            .assemble(&story(2), ContextRole::PlayerTurn(&character))
            .await;

        assert!(context.render().starts_with("Character: {"));
        assert_eq!(context.passages.len(), 1);
        let seed = store.seeds().pop().unwrap();
        assert!(seed.contains("Event number 2"));
        assert!(seed.contains(&character.backstory));
    }

    #[tokio::test]
    async fn test_failed_retrieval_degrades() {
        let store = Arc::new(CountingStore::failing());
        let assembler = ContextAssembler::new(store.clone(), &GameConfig::default());

        let context = assembler.assemble(&story(2), ContextRole::DmTurn).await;
        assert!(context.passages.is_empty());
        assert_eq!(context.recent, story(2).join("\n"));
        assert_eq!(store.query_calls(), 1);
    }
}
