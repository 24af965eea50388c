//! Session state: the single mutable root owned by the turn engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of story lines narrated by the DM.
pub const DM_PREFIX: &str = "DM: ";

/// Prefix of story lines committed by the players.
pub const PLAYER_PREFIX: &str = "Player: ";

/// Where the session is in its turn cycle.
///
/// `start -> intro -> choice -> dm_response -> choice -> ...`; `start` is
/// only re-entered through a new party.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Start,
    Intro,
    Choice,
    DmResponse,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Intro => "intro",
            Phase::Choice => "choice",
            Phase::DmResponse => "dm_response",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical state of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Completed DM narrations, counting the intro as the first.
    pub turn: u32,
    pub phase: Phase,
    /// Speaker-tagged lines, append-only while the session lives.
    pub story: Vec<String>,
    /// Opening passage, set once by start adventure.
    pub intro_text: Option<String>,
    /// Candidate actions, non-empty only during `choice`.
    pub current_options: Vec<String>,
    /// Most recently committed player action.
    pub last_choice: Option<String>,
}

impl SessionState {
    /// A fresh session in the `start` phase.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_line(&self) -> Option<&str> {
        self.story.last().map(String::as_str)
    }

    /// Whether a player action is waiting for the DM's continuation.
    pub fn awaiting_dm(&self) -> bool {
        self.phase == Phase::Choice
            && self
                .last_line()
                .is_some_and(|line| line.starts_with(PLAYER_PREFIX))
    }

    /// Check the structural invariants, e.g. for state loaded from disk.
    pub fn check(&self) -> Result<(), String> {
        if !self.current_options.is_empty() && self.phase != Phase::Choice {
            return Err(format!(
                "{} options present in phase {}",
                self.current_options.len(),
                self.phase
            ));
        }

        match self.phase {
            Phase::Start => {
                if self.turn != 0 || !self.story.is_empty() {
                    return Err("start phase with story already begun".into());
                }
            }
            _ => {
                if self.intro_text.is_none() || self.turn == 0 {
                    return Err(format!("phase {} without an intro", self.phase));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Phase::DmResponse).unwrap(), "\"dm_response\"");
        assert_eq!(Phase::Choice.to_string(), "choice");
    }

    #[test]
    fn test_fresh_state() {
        let state = SessionState::new();
        assert_eq!(state.phase, Phase::Start);
        assert_eq!(state.turn, 0);
        assert!(state.check().is_ok());
        assert!(!state.awaiting_dm());
    }

    #[test]
    fn test_check_catches_stray_options() {
        let state = SessionState {
            turn: 1,
            phase: Phase::Intro,
            story: vec!["DM: Hello.".into()],
            intro_text: Some("Hello.".into()),
            current_options: vec!["Wave".into()],
            last_choice: None,
        };
        assert!(state.check().is_err());
    }

    #[test]
    fn test_awaiting_dm() {
        let mut state = SessionState {
            turn: 1,
            phase: Phase::Choice,
            story: vec!["DM: Hello.".into()],
            intro_text: Some("Hello.".into()),
            current_options: vec!["Wave".into()],
            last_choice: None,
        };
        assert!(!state.awaiting_dm());
        state.story.push("Player: Wave".into());
        assert!(state.awaiting_dm());
    }
}
