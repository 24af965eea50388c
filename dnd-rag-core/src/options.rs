//! Generation of the action options offered to the players each turn.

use crate::gateway::{retry_schema, Gateway, GatewayError, RetryPolicy};
use crate::prompts;
use dnd_macros::Schema;
use serde::Deserialize;

/// Number of options offered per turn.
pub const OPTION_COUNT: usize = 3;

/// Structured reply carrying the candidate actions.
#[derive(Debug, Clone, Deserialize, Schema)]
#[schema(name = "action_options")]
pub struct ActionOptions {
    /// Exactly three short actions the party could take next
    pub choice: Vec<String>,
}

/// Models answer with the wrapped object or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum OptionsReply {
    Wrapped(ActionOptions),
    Bare(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct OptionGenerator {
    gateway: Gateway,
    schema_retry: RetryPolicy,
}

impl OptionGenerator {
    pub fn new(gateway: Gateway, schema_retry: RetryPolicy) -> Self {
        Self {
            gateway,
            schema_retry,
        }
    }

    /// Produce exactly [`OPTION_COUNT`] options for the given context.
    ///
    /// Replies with fewer non-blank options count as parse failures and are
    /// regenerated; extra options are dropped.
    pub async fn generate_options(&self, context: &str) -> Result<Vec<String>, GatewayError> {
        retry_schema(&self.schema_retry, "options", move || self.try_generate(context)).await
    }

    async fn try_generate(&self, context: &str) -> Result<Vec<String>, GatewayError> {
        let sampling = prompts::OPTIONS;
        let reply: OptionsReply = self
            .gateway
            .generate_json(
                prompts::options(context),
                ActionOptions::json_schema(),
                sampling.max_tokens,
                sampling.temperature,
            )
            .await?;

        let raw = match reply {
            OptionsReply::Wrapped(options) => options.choice,
            OptionsReply::Bare(list) => list,
        };
        let mut options: Vec<String> = raw
            .into_iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        if options.len() < OPTION_COUNT {
            return Err(GatewayError::SchemaParse(format!(
                "expected {OPTION_COUNT} options, got {}",
                options.len()
            )));
        }
        options.truncate(OPTION_COUNT);
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use std::sync::Arc;

    fn generator(model: &Arc<ScriptedModel>) -> OptionGenerator {
        OptionGenerator::new(
            Gateway::new(model.clone()).with_retry(RetryPolicy::immediate(1)),
            RetryPolicy::immediate(3),
        )
    }

    #[tokio::test]
    async fn test_wrapped_options() {
        let model = Arc::new(ScriptedModel::new());
        model.push_chat("Here you go:\n```json\n{\"choice\": [\"Run\", \"Hide\", \"Fight\"]}\n```");

        let options = generator(&model).generate_options("Recent events: Wolves.").await.unwrap();
        assert_eq!(options, vec!["Run", "Hide", "Fight"]);
    }

    #[tokio::test]
    async fn test_bare_array_truncated() {
        let model = Arc::new(ScriptedModel::new());
        model.push_chat(r#"["Pray", "Sing", "Bargain", "Flee"]"#);

        let options = generator(&model).generate_options("").await.unwrap();
        assert_eq!(options, vec!["Pray", "Sing", "Bargain"]);
    }

    #[tokio::test]
    async fn test_too_few_options_retried() {
        let model = Arc::new(ScriptedModel::new());
        model.push_chat(r#"{"choice": ["Wait", "  "]}"#);
        model.push_chat(r#"{"choice": ["Climb", "Swim", "Dig"]}"#);

        let options = generator(&model).generate_options("").await.unwrap();
        assert_eq!(options, vec!["Climb", "Swim", "Dig"]);
        assert_eq!(model.chat_calls(), 2);
    }

    #[tokio::test]
    async fn test_bracketed_prose_before_payload() {
        let model = Arc::new(ScriptedModel::new());
        model.push_chat("Here are [3] options: ```json {\"choice\": [\"Run\",\"Hide\",\"Fight\"]} ```");

        let options = generator(&model).generate_options("").await.unwrap();
        assert_eq!(options, vec!["Run", "Hide", "Fight"]);
        assert_eq!(model.chat_calls(), 1);
    }

    #[test]
    fn test_schema_shape() {
        let schema = ActionOptions::json_schema();
        assert_eq!(schema["properties"]["choice"]["items"]["type"], "string");
        assert_eq!(schema["required"][0], "choice");
        assert_eq!(
            schema["properties"]["choice"]["description"],
            "Exactly three short actions the party could take next"
        );
        assert_eq!(ActionOptions::schema_name(), "action_options");
    }
}
