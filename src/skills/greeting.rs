//! Small talk

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Intent, Skill, SkillError, SkillParams};
use crate::config::SkillConfig;

/// Greetings and introductions
#[derive(Debug, Clone)]
pub struct GreetingSkill {
    assistant_name: String,
}

impl Default for GreetingSkill {
    fn default() -> Self {
        Self::new("Jetson")
    }
}

impl GreetingSkill {
    pub const NAME: &'static str = "greeting";

    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
        }
    }

    /// Build from `[skills.greeting]` (`assistant_name` parameter)
    #[must_use]
    pub fn from_config(config: &SkillConfig) -> Self {
        config
            .param_str("assistant_name")
            .map_or_else(Self::default, Self::new)
    }
}

#[async_trait]
impl Skill for GreetingSkill {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Answers greetings and introduces the assistant"
    }

    fn intents(&self) -> Vec<Intent> {
        [
            ("hello", "hello"),
            ("say hello", "hello"),
            ("good morning", "hello"),
            ("what's your name", "name"),
            ("who are you", "name"),
            ("how are you", "how_are_you"),
            ("thank you", "thanks"),
        ]
        .into_iter()
        .map(|(phrase, handler)| Intent::phrase(phrase, handler))
        .collect()
    }

    async fn execute(
        &self,
        handler: &str,
        _params: &SkillParams,
        _cancel: CancellationToken,
    ) -> std::result::Result<String, SkillError> {
        match handler {
            "hello" => Ok("Hello! How can I help?".to_string()),
            "name" => Ok(format!("I'm {}, your assistant.", self.assistant_name)),
            "how_are_you" => Ok("I'm doing well, thanks for asking.".to_string()),
            "thanks" => Ok("You're welcome.".to_string()),
            other => Err(SkillError::new(format!("unknown handler {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn introduces_itself_by_configured_name() {
        let skill = GreetingSkill::new("Nova");
        let reply = skill
            .execute("name", &SkillParams::new(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "I'm Nova, your assistant.");
    }

    #[tokio::test]
    async fn unknown_handler_fails() {
        let err = GreetingSkill::default()
            .execute("weather", &SkillParams::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason, "unknown handler weather");
    }
}
