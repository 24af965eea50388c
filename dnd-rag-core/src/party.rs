//! Party members and the Party Generator.

use crate::gateway::{retry_schema, Gateway, GatewayError, RetryPolicy};
use crate::prompts;
use dnd_macros::Schema;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One adventurer, as produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Schema)]
#[schema(name = "character")]
pub struct Character {
    /// Character name
    pub name: String,

    /// Fantasy race, e.g. "Half-Elf"
    pub race: String,

    /// Character class, e.g. "Wizard"
    #[serde(rename = "class", alias = "character_class")]
    #[schema(rename = "class")]
    pub class_name: String,

    /// A few sentences of history
    pub backstory: String,

    /// Items the character carries
    pub items: Vec<String>,

    /// Personality traits
    pub personality: String,
}

impl Character {
    /// Reject characters the model returned with blank identifying fields.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("name", &self.name),
            ("race", &self.race),
            ("class", &self.class_name),
        ] {
            if value.trim().is_empty() {
                return Err(format!("character field '{field}' is blank"));
            }
        }
        Ok(())
    }

    /// One-line summary, e.g. "Aria (Elf Ranger)".
    pub fn summary(&self) -> String {
        format!("{} ({} {})", self.name, self.race, self.class_name)
    }
}

/// A character bound to its display slot ("Player 1", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyMember {
    pub slot: String,
    pub character: Character,
}

/// The party, in slot order. Replaced wholesale, never edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    members: Vec<PartyMember>,
}

impl Party {
    pub fn new(members: Vec<PartyMember>) -> Self {
        Self { members }
    }

    /// Look up a member by slot name. Case-insensitive.
    pub fn get(&self, slot: &str) -> Option<&Character> {
        self.members
            .iter()
            .find(|m| m.slot.eq_ignore_ascii_case(slot.trim()))
            .map(|m| &m.character)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Slot names in order.
    pub fn slots(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.slot.as_str()).collect()
    }

    /// Character names in slot order.
    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.character.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartyMember> {
        self.members.iter()
    }
}

/// Produces parties through schema-constrained generation.
#[derive(Debug, Clone)]
pub struct PartyGenerator {
    gateway: Gateway,
    schema_retry: RetryPolicy,
}

impl PartyGenerator {
    pub fn new(gateway: Gateway, schema_retry: RetryPolicy) -> Self {
        Self {
            gateway,
            schema_retry,
        }
    }

    /// Generate `count` characters keyed "Player 1" through "Player {count}".
    ///
    /// A character that fails to parse or validate is regenerated on its own
    /// under the schema retry policy; earlier characters are kept.
    pub async fn generate_party(&self, count: usize) -> Result<Party, GatewayError> {
        let mut members = Vec::with_capacity(count);

        for n in 1..=count {
            let slot = format!("Player {n}");
            let slot_ref = slot.as_str();
            let character = retry_schema(&self.schema_retry, "character", move || {
                self.generate_character(slot_ref)
            })
            .await?;

            info!(slot = %slot, character = %character.summary(), "character created");
            members.push(PartyMember { slot, character });
        }

        Ok(Party::new(members))
    }

    async fn generate_character(&self, slot: &str) -> Result<Character, GatewayError> {
        let sampling = prompts::CHARACTER;
        let character: Character = self
            .gateway
            .generate_json(
                prompts::character(slot),
                Character::json_schema(),
                sampling.max_tokens,
                sampling.temperature,
            )
            .await?;

        character.validate().map_err(GatewayError::SchemaParse)?;
        Ok(character)
    }
}
