//! Skills and intent resolution
//!
//! Skills are registered once at startup. [`SkillRegistry::resolve`] only
//! selects a handler; running it is the engine's job so deadlines and
//! cancellation apply uniformly.

mod greeting;
pub mod matcher;
mod time_date;
mod types;

use std::sync::Arc;

pub use greeting::GreetingSkill;
pub use time_date::TimeDateSkill;
pub use types::{Intent, IntentMatch, IntentPattern, Skill, SkillError, SkillParams};

use crate::config::Config;
use crate::{Error, Result};

/// Default minimum score for a match
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.75;

struct Registered {
    skill: Arc<dyn Skill>,
    intents: Vec<Intent>,
}

/// Registered skills and their intents, in registration order
pub struct SkillRegistry {
    skills: Vec<Registered>,
    threshold: f32,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("skills", &self.names().collect::<Vec<_>>())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl SkillRegistry {
    /// Create an empty registry accepting matches scoring at least `threshold`
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            skills: Vec::new(),
            threshold,
        }
    }

    /// Register a skill
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateSkillName` if the name is taken, or
    /// `Error::InvalidPattern` if an intent has an empty phrase. The registry
    /// is unchanged on error.
    pub fn register(&mut self, skill: impl Skill) -> Result<()> {
        self.register_arc(Arc::new(skill))
    }

    /// Register an already shared skill
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`]
    pub fn register_arc(&mut self, skill: Arc<dyn Skill>) -> Result<()> {
        let name = skill.name().to_string();
        if self.contains(&name) {
            return Err(Error::DuplicateSkillName(name));
        }

        let intents = skill.intents();
        if let Some(empty) = intents
            .iter()
            .find(|i| matches!(&i.pattern, IntentPattern::Phrase(p) if p.is_empty()))
        {
            return Err(Error::InvalidPattern(format!(
                "skill {name}: empty phrase for handler {}",
                empty.handler
            )));
        }

        tracing::debug!(skill = %name, intents = intents.len(), "registered skill");
        self.skills.push(Registered { skill, intents });
        Ok(())
    }

    /// Select the best intent for an utterance
    ///
    /// Returns `None` when nothing scores at or above the threshold. On equal
    /// scores the earliest registered intent wins.
    #[must_use]
    pub fn resolve(&self, utterance: &str) -> Option<IntentMatch> {
        let text = matcher::normalize(utterance);
        if text.is_empty() {
            return None;
        }

        let mut best: Option<IntentMatch> = None;
        for entry in &self.skills {
            for intent in &entry.intents {
                let Some((score, params)) = score_intent(&intent.pattern, &text) else {
                    continue;
                };
                if best.as_ref().is_some_and(|b| score <= b.score) {
                    continue;
                }
                best = Some(IntentMatch {
                    skill: Arc::clone(&entry.skill),
                    pattern: intent.pattern.as_str().to_string(),
                    handler: intent.handler.clone(),
                    score,
                    params,
                });
            }
        }

        match best {
            Some(m) if m.score >= self.threshold => {
                tracing::debug!(utterance = %text, skill = m.skill_name(), score = m.score, "intent resolved");
                Some(m)
            }
            other => {
                tracing::debug!(
                    utterance = %text,
                    best = other.as_ref().map(|m| m.score),
                    "no intent matched"
                );
                None
            }
        }
    }

    /// Registered skills in registration order
    pub fn skills(&self) -> impl Iterator<Item = &Arc<dyn Skill>> {
        self.skills.iter().map(|r| &r.skill)
    }

    /// Registered skill names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.skills.iter().map(|r| r.skill.name())
    }

    /// Intents recorded for a skill at registration
    #[must_use]
    pub fn intents(&self, name: &str) -> Option<&[Intent]> {
        self.skills
            .iter()
            .find(|r| r.skill.name() == name)
            .map(|r| r.intents.as_slice())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.skills.iter().any(|r| r.skill.name() == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

fn score_intent(pattern: &IntentPattern, text: &str) -> Option<(f32, SkillParams)> {
    match pattern {
        IntentPattern::Phrase(phrase) => Some((matcher::score_phrase(text, phrase), SkillParams::new())),
        IntentPattern::Regex(re) => {
            let caps = re.captures(text)?;
            let params = re
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), m.as_str().trim().to_string()))
                })
                .collect();
            Some((1.0, params))
        }
    }
}

/// Build a registry with the built-in skills enabled in `config`
///
/// # Errors
///
/// Returns error if a built-in skill rejects its configuration
pub fn builtin_registry(config: &Config) -> Result<SkillRegistry> {
    let mut registry = SkillRegistry::new(config.engine.match_threshold);

    if config.skill_enabled(TimeDateSkill::NAME) {
        registry.register(TimeDateSkill::from_config(&config.skill(TimeDateSkill::NAME))?)?;
    }
    if config.skill_enabled(GreetingSkill::NAME) {
        registry.register(GreetingSkill::from_config(&config.skill(GreetingSkill::NAME)))?;
    }

    tracing::info!(skills = ?registry.names().collect::<Vec<_>>(), "skills loaded");
    Ok(registry)
}
