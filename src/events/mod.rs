//! Pipeline events
//!
//! Every stage of the assistant talks to the others through immutable events
//! on the [`EventBus`]. Events carry a bus-assigned sequence number, the
//! session they belong to (if any) and a UTC timestamp.

mod bus;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

pub use bus::{EventBus, EventHandler, FnHandler, SubscriptionToken, handler_fn};

use crate::engine::{SessionId, SessionOutcome};

/// Discriminant used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WakeDetected,
    UtteranceCaptured,
    TranscriptReady,
    IntentResolved,
    ResponseReady,
    ErrorOccurred,
    SessionEnded,
    Shutdown,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WakeDetected => "wake_detected",
            Self::UtteranceCaptured => "utterance_captured",
            Self::TranscriptReady => "transcript_ready",
            Self::IntentResolved => "intent_resolved",
            Self::ResponseReady => "response_ready",
            Self::ErrorOccurred => "error_occurred",
            Self::SessionEnded => "session_ended",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Where a reported error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Wake word, capture or speech-to-text backend
    Speech,
    /// Text-to-speech backend
    Synthesis,
    /// A skill handler
    Skill,
    /// The engine itself (pool exhaustion, deadlines)
    Engine,
    /// An event subscriber
    Bus,
}

/// Event data
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// The wake word was heard
    WakeDetected { wake_word: String },

    /// A spoken command finished recording
    UtteranceCaptured { duration_ms: Option<u64> },

    /// Speech-to-text finished
    TranscriptReady { text: String },

    /// The registry selected a skill
    IntentResolved {
        skill: String,
        pattern: String,
        score: f32,
        params: BTreeMap<String, String>,
    },

    /// A response was spoken
    ResponseReady { text: String },

    /// Something failed; see `origin`
    ErrorOccurred { origin: ErrorOrigin, message: String },

    /// A session reached its terminal outcome
    SessionEnded { outcome: SessionOutcome },

    /// The assistant is shutting down
    Shutdown,
}

impl EventPayload {
    /// Kind of this payload
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::WakeDetected { .. } => EventKind::WakeDetected,
            Self::UtteranceCaptured { .. } => EventKind::UtteranceCaptured,
            Self::TranscriptReady { .. } => EventKind::TranscriptReady,
            Self::IntentResolved { .. } => EventKind::IntentResolved,
            Self::ResponseReady { .. } => EventKind::ResponseReady,
            Self::ErrorOccurred { .. } => EventKind::ErrorOccurred,
            Self::SessionEnded { .. } => EventKind::SessionEnded,
            Self::Shutdown => EventKind::Shutdown,
        }
    }

    /// Error reported by a speech backend
    pub fn speech_error(message: impl Into<String>) -> Self {
        Self::ErrorOccurred {
            origin: ErrorOrigin::Speech,
            message: message.into(),
        }
    }
}

/// An immutable fact published on the bus
#[derive(Debug, Clone)]
pub struct Event {
    /// Bus-assigned sequence number, strictly increasing per bus
    pub seq: u64,
    /// Session this event belongs to, when known to the publisher
    pub session_id: Option<SessionId>,
    /// Event data
    pub payload: EventPayload,
    /// Publication time
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Kind of this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.session_id {
            Some(id) => write!(f, "Event(#{} {}, session={id})", self.seq, self.kind()),
            None => write!(f, "Event(#{} {})", self.seq, self.kind()),
        }
    }
}
