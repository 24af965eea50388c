//! Prompt text and sampling parameters for every model call the engine makes.

use crate::gateway::ChatMessage;

/// Output budget and temperature for one kind of call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub max_tokens: usize,
    pub temperature: f32,
}

pub const CHARACTER: Sampling = Sampling {
    max_tokens: 200,
    temperature: 0.7,
};

/// Intro and DM continuation.
pub const DM_NARRATION: Sampling = Sampling {
    max_tokens: 3000,
    temperature: 0.8,
};

pub const PLAYER_ACTION: Sampling = Sampling {
    max_tokens: 150,
    temperature: 0.6,
};

pub const OPTIONS: Sampling = Sampling {
    max_tokens: 150,
    temperature: 0.6,
};

pub const DM_QUESTION: Sampling = Sampling {
    max_tokens: 2000,
    temperature: 0.8,
};

pub const REFORMULATION: Sampling = Sampling {
    max_tokens: 128,
    temperature: 0.3,
};

const DM_SYSTEM: &str = "You are the Dungeon Master.";

/// Opening scene for the named party.
pub fn dm_intro(names: &[String], context: &str) -> String {
    let mut prompt = format!(
        "SYSTEM: You are the Dungeon Master. Describe a scene (200-300 words) and end with a clear challenge.\n\
         USER: Start an epic adventure with: {}.",
        names.join(", ")
    );
    if !context.is_empty() {
        prompt.push('\n');
        prompt.push_str(context);
    }
    prompt
}

/// Continuation after a player action.
pub fn dm_turn(context: &str) -> String {
    format!(
        "SYSTEM: You are the Dungeon Master. Continue the narrative (150-250 words), \
         summarizing what happened and presenting the next challenge.\n\
         USER: {context}"
    )
}

/// In-character action for one party member.
pub fn player_action(context: &str) -> String {
    format!(
        "SYSTEM: You are a player character. Stay in character, describe only your single action (100-150 words).\n\
         USER: {context}"
    )
}

/// Messages asking for exactly three action options.
pub fn options(context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(DM_SYSTEM),
        ChatMessage::user(format!(
            "Given recent events, output exactly 3 possible action options as a JSON object \
             with a \"choice\" array of strings.\n{context}"
        )),
    ]
}

/// Messages asking for one new character.
pub fn character(slot: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(DM_SYSTEM),
        ChatMessage::user(format!(
            "Create a new Dungeons & Dragons player character for {slot}. \
             Respond with JSON containing name, race, class, backstory, items and personality."
        )),
    ]
}

/// Messages for a player's out-of-band question to the DM.
pub fn dm_question(question: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You are the Dungeon Master. You answer your players questions truthfully \
             without giving away too much information.",
        ),
        ChatMessage::user(format!("Player Question {question}\nContext: {context}")),
    ]
}

/// Rewrite retrieval seed text as a search question.
pub fn reformulation(seed: &str) -> String {
    format!(
        "Formulate a question for a vector database based on the following information, \
         to retrieve more context. Only return the question: {seed}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Role;

    #[test]
    fn test_intro_names_party() {
        let prompt = dm_intro(&["Aria".to_string(), "Bram".to_string()], "");
        assert!(prompt.ends_with("Start an epic adventure with: Aria, Bram."));
    }

    #[test]
    fn test_question_messages() {
        let messages = dm_question("Is the door trapped?", "Recent events: A door.");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].content.contains("Is the door trapped?"));
        assert!(messages[1].content.contains("Recent events: A door."));
    }

    #[test]
    fn test_options_ask_for_choice_object() {
        let messages = options("Recent events: Wolves.");
        assert!(messages[1].content.contains("JSON object with a \"choice\" array"));
        assert!(messages[1].content.ends_with("Recent events: Wolves."));
    }

    #[test]
    fn test_character_names_slot() {
        let messages = character("Player 2");
        assert_eq!(messages[0].content, DM_SYSTEM);
        assert!(messages[1].content.contains("Player 2"));
    }
}
