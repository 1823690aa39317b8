//! Skill type definitions

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::matcher::normalize;
use crate::Result;

/// Parameters captured from an utterance (named regex groups)
pub type SkillParams = BTreeMap<String, String>;

/// Failure reported by a skill handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("skill error: {reason}")]
pub struct SkillError {
    pub reason: String,
}

impl SkillError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// How an intent recognizes utterances
#[derive(Debug, Clone)]
pub enum IntentPattern {
    /// Normalized phrase scored by edit distance
    Phrase(String),
    /// Regular expression over the normalized utterance; named groups become
    /// parameters and any match scores 1.0
    Regex(Regex),
}

impl IntentPattern {
    /// Source text of the pattern
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Phrase(p) => p,
            Self::Regex(r) => r.as_str(),
        }
    }
}

impl fmt::Display for IntentPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phrase(p) => write!(f, "\"{p}\""),
            Self::Regex(r) => write!(f, "/{}/", r.as_str()),
        }
    }
}

/// A pattern and the handler it routes to
#[derive(Debug, Clone)]
pub struct Intent {
    pub pattern: IntentPattern,
    /// Handler name passed back to [`Skill::execute`]
    pub handler: String,
}

impl Intent {
    /// Phrase intent; the phrase is normalized here
    pub fn phrase(phrase: &str, handler: impl Into<String>) -> Self {
        Self {
            pattern: IntentPattern::Phrase(normalize(phrase)),
            handler: handler.into(),
        }
    }

    /// Regex intent matched against normalized (lowercase) utterances
    ///
    /// # Errors
    ///
    /// Returns `Error::Regex` if the pattern does not compile
    pub fn regex(pattern: &str, handler: impl Into<String>) -> Result<Self> {
        Ok(Self {
            pattern: IntentPattern::Regex(Regex::new(pattern)?),
            handler: handler.into(),
        })
    }
}

/// A unit of assistant capability
///
/// Handlers may be long-running but must return promptly once `cancel`
/// fires. A cancelled handler's result is discarded.
#[async_trait]
pub trait Skill: Send + Sync + 'static {
    /// Unique skill name
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Ordered intents; read once at registration
    fn intents(&self) -> Vec<Intent>;

    /// Run `handler` with the captured parameters
    async fn execute(
        &self,
        handler: &str,
        params: &SkillParams,
        cancel: CancellationToken,
    ) -> std::result::Result<String, SkillError>;

    /// Release resources when the assistant shuts down
    async fn stop(&self) {}
}

/// Outcome of resolving an utterance
#[derive(Clone)]
pub struct IntentMatch {
    /// Matched skill
    pub skill: Arc<dyn Skill>,
    /// Source text of the matched pattern
    pub pattern: String,
    /// Handler to invoke
    pub handler: String,
    /// Match confidence in `[0, 1]`
    pub score: f32,
    /// Captured parameters
    pub params: SkillParams,
}

impl IntentMatch {
    #[must_use]
    pub fn skill_name(&self) -> &str {
        self.skill.name()
    }
}

impl fmt::Debug for IntentMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntentMatch")
            .field("skill", &self.skill.name())
            .field("pattern", &self.pattern)
            .field("handler", &self.handler)
            .field("score", &self.score)
            .field("params", &self.params)
            .finish()
    }
}
