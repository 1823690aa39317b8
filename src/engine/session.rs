//! One wake-to-response cycle

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use super::PipelineState;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell sessions apart in logs
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Why a failed session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Speech or synthesis backend
    Provider,
    /// Skill handler error
    Skill,
    /// No worker was free
    WorkerPoolExhausted,
}

/// Terminal outcome, reached exactly once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A response was spoken
    Responded,
    /// A deadline fired
    TimedOut,
    /// The session ended on an error
    Failed(FailureKind),
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Responded => f.write_str("responded"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Failed(FailureKind::Provider) => f.write_str("failed (provider)"),
            Self::Failed(FailureKind::Skill) => f.write_str("failed (skill)"),
            Self::Failed(FailureKind::WorkerPoolExhausted) => f.write_str("failed (busy)"),
        }
    }
}

/// The active session, owned by the engine's control loop
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
    /// When the current stage's budget runs out
    pub deadline: Instant,
    pub transcript: String,
    /// Outcome to report once the queued response has been spoken
    pub pending_outcome: SessionOutcome,
}

impl Session {
    /// Create a session with the given hotword budget
    ///
    /// The session starts in `Idle`; the wake word moves it on.
    #[must_use]
    pub fn start(deadline: Instant) -> Self {
        Self {
            id: SessionId::new(),
            state: PipelineState::Idle,
            started_at: Utc::now(),
            deadline,
            transcript: String::new(),
            pending_outcome: SessionOutcome::Responded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_short() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 8);
    }

    #[test]
    fn session_waits_for_the_wake_transition() {
        let session = Session::start(Instant::now());
        assert!(session.state.is_idle());
        assert_eq!(
            session.state.on(crate::engine::Trigger::WakeDetected),
            Some(PipelineState::Listening)
        );
    }

    #[test]
    fn outcome_display() {
        assert_eq!(SessionOutcome::TimedOut.to_string(), "timed out");
        assert_eq!(
            SessionOutcome::Failed(FailureKind::WorkerPoolExhausted).to_string(),
            "failed (busy)"
        );
    }
}
