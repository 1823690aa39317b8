//! Wake word detection
//!
//! Detects wake words in transcribed text to activate the assistant.
//! Whole-word, case-insensitive matches are tried first; with a non-zero
//! sensitivity a near miss such as "hey jetsun" is accepted too.

use regex::Regex;

use crate::skills::matcher::{normalize, similarity};
use crate::{Error, Result};

/// State of the wake word detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for the wake word
    Idle,
    /// Wake word detected, waiting for the command
    Activated,
}

/// A located wake word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeMatch {
    /// The configured wake word that matched
    pub wake_word: String,
    /// Text following the wake word (may be empty)
    pub command: String,
}

/// Detects wake words in transcripts
pub struct WakeWordDetector {
    wake_words: Vec<String>,
    patterns: Vec<Regex>,
    min_similarity: f32,
    state: DetectorState,
}

impl WakeWordDetector {
    /// Create a new wake word detector
    ///
    /// # Arguments
    ///
    /// * `wake_words` - List of wake words to detect (e.g., "hey jetson")
    /// * `sensitivity` - 0.0 accepts exact matches only; 1.0 accepts a
    ///   transcript window at least half similar to the wake word
    ///
    /// # Errors
    ///
    /// Returns error if no usable wake word is given
    pub fn new(wake_words: Vec<String>, sensitivity: f32) -> Result<Self> {
        let normalized: Vec<String> = wake_words
            .iter()
            .map(|w| normalize(w))
            .filter(|w| !w.is_empty())
            .collect();

        if normalized.is_empty() {
            return Err(Error::WakeWord("at least one wake word is required".to_string()));
        }

        let patterns = normalized
            .iter()
            .map(|w| wake_pattern(w))
            .collect::<Result<Vec<_>>>()?;
        let min_similarity = 1.0 - sensitivity.clamp(0.0, 1.0) * 0.5;
        tracing::debug!(wake_words = ?normalized, min_similarity, "wake word detector initialized");

        Ok(Self {
            wake_words: normalized,
            patterns,
            min_similarity,
            state: DetectorState::Idle,
        })
    }

    /// Locate a wake word in `transcript` without changing state
    #[must_use]
    pub fn find(&self, transcript: &str) -> Option<WakeMatch> {
        for (wake_word, pattern) in self.wake_words.iter().zip(&self.patterns) {
            if let Some(m) = pattern.find(transcript) {
                return Some(WakeMatch {
                    wake_word: wake_word.clone(),
                    command: command_after(transcript, m.end()),
                });
            }
        }

        if self.min_similarity >= 1.0 {
            return None;
        }

        let normalized = normalize(transcript);
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        for wake_word in &self.wake_words {
            let width = wake_word.split(' ').count();
            if tokens.len() < width {
                continue;
            }
            for start in 0..=tokens.len() - width {
                let window = tokens[start..start + width].join(" ");
                if similarity(&window, wake_word) >= self.min_similarity {
                    return Some(WakeMatch {
                        wake_word: wake_word.clone(),
                        command: tokens[start + width..].join(" "),
                    });
                }
            }
        }

        None
    }

    /// Check if transcribed text contains a wake word
    ///
    /// Activates the detector on a match and resets it otherwise.
    pub fn check_wake_word(&mut self, transcript: &str) -> Option<WakeMatch> {
        if let Some(found) = self.find(transcript) {
            tracing::info!(wake_word = %found.wake_word, transcript, "wake word detected");
            self.state = DetectorState::Activated;
            return Some(found);
        }

        self.reset();
        None
    }

    /// Check if currently activated (wake word was detected)
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.state == DetectorState::Activated
    }

    /// Reset detector to idle state
    pub const fn reset(&mut self) {
        self.state = DetectorState::Idle;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Get the configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }

    /// Manually activate (skip wake word detection)
    pub const fn activate(&mut self) {
        self.state = DetectorState::Activated;
    }
}

/// Extract command after wake word
#[must_use]
pub fn extract_command(transcript: &str, wake_word: &str) -> String {
    wake_pattern(wake_word)
        .ok()
        .and_then(|pattern| pattern.find(transcript).map(|m| m.end()))
        .map_or_else(|| transcript.to_string(), |end| command_after(transcript, end))
}

/// Whole-word, case-insensitive pattern for a wake word; any run of
/// spaces or punctuation may separate its words
fn wake_pattern(wake_word: &str) -> Result<Regex> {
    let words: Vec<String> = normalize(wake_word)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(regex::escape)
        .collect();
    if words.is_empty() {
        return Err(Error::WakeWord("empty wake word".to_string()));
    }
    Ok(Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\W+")))?)
}

fn command_after(transcript: &str, end: usize) -> String {
    transcript
        .get(end..)
        .unwrap_or_default()
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?' | ':'))
        .trim_end()
        .to_string()
}
