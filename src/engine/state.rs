//! Pipeline state machine

use std::fmt;

/// Where the active session is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// No session
    #[default]
    Idle,
    /// Wake word heard, waiting for the command to start
    Listening,
    /// Command recorded, waiting for the transcript
    Capturing,
    /// Resolving the transcript to an intent
    Recognizing,
    /// A skill handler is running
    Dispatching,
    /// Speaking the response
    Synthesizing,
    /// A failure was reported and is being turned into an outcome
    Error,
}

impl PipelineState {
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// What the session is waiting on, for deadline messages
    #[must_use]
    pub const fn activity(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "waiting for a command",
            Self::Capturing => "waiting for a transcript",
            Self::Recognizing => "resolving an intent",
            Self::Dispatching => "running a skill",
            Self::Synthesizing => "speaking",
            Self::Error => "handling an error",
        }
    }

    /// Apply a trigger
    ///
    /// Returns `None` when the trigger is not valid in this state, which
    /// leaves the state unchanged.
    #[must_use]
    pub const fn on(self, trigger: Trigger) -> Option<Self> {
        use PipelineState as S;
        use Trigger as T;

        let next = match (self, trigger) {
            (S::Idle, T::WakeDetected) => S::Listening,
            (S::Listening, T::UtteranceCaptured) => S::Capturing,
            (S::Capturing, T::TranscriptReady) => S::Recognizing,
            (S::Recognizing, T::Matched) => S::Dispatching,
            (S::Recognizing, T::NoMatch) | (S::Dispatching, T::HandlerFinished) => S::Synthesizing,
            (S::Synthesizing, T::Spoken) => S::Idle,

            // A handler that overran still gets a spoken timeout response
            (S::Dispatching, T::Deadline) => S::Synthesizing,
            (S::Idle, T::Deadline) => return None,
            (_, T::Deadline) => S::Idle,

            (S::Idle | S::Error, T::Fault) => return None,
            (_, T::Fault) => S::Error,
            (S::Error, T::ResponseQueued) => S::Synthesizing,
            (S::Error, T::Abandoned) => S::Idle,

            _ => return None,
        };
        Some(next)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Capturing => "capturing",
            Self::Recognizing => "recognizing",
            Self::Dispatching => "dispatching",
            Self::Synthesizing => "synthesizing",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    WakeDetected,
    UtteranceCaptured,
    TranscriptReady,
    /// The registry found an intent
    Matched,
    /// The registry found nothing, or the transcript was empty
    NoMatch,
    /// The handler returned a response or a skill error
    HandlerFinished,
    /// The response has been spoken
    Spoken,
    /// The current stage's deadline passed
    Deadline,
    /// A provider, pool or synthesis failure
    Fault,
    /// A failure response is ready to speak
    ResponseQueued,
    /// Nothing can be spoken for this failure
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    use PipelineState as S;
    use Trigger as T;

    const ALL: [PipelineState; 7] = [
        S::Idle,
        S::Listening,
        S::Capturing,
        S::Recognizing,
        S::Dispatching,
        S::Synthesizing,
        S::Error,
    ];

    #[test]
    fn happy_path() {
        let mut state = S::Idle;
        for trigger in [
            T::WakeDetected,
            T::UtteranceCaptured,
            T::TranscriptReady,
            T::Matched,
            T::HandlerFinished,
            T::Spoken,
        ] {
            state = state.on(trigger).unwrap();
        }
        assert_eq!(state, S::Idle);
    }

    #[test]
    fn no_match_goes_straight_to_synthesis() {
        assert_eq!(S::Recognizing.on(T::NoMatch), Some(S::Synthesizing));
    }

    #[test]
    fn wake_is_ignored_while_busy() {
        for state in ALL.into_iter().filter(|s| !s.is_idle()) {
            assert_eq!(state.on(T::WakeDetected), None, "{state}");
        }
    }

    #[test]
    fn deadline_returns_to_idle_except_while_dispatching() {
        assert_eq!(S::Idle.on(T::Deadline), None);
        assert_eq!(S::Dispatching.on(T::Deadline), Some(S::Synthesizing));
        for state in [S::Listening, S::Capturing, S::Recognizing, S::Synthesizing, S::Error] {
            assert_eq!(state.on(T::Deadline), Some(S::Idle), "{state}");
        }
    }

    #[test]
    fn faults_lead_through_error() {
        for state in ALL.into_iter().filter(|s| !s.is_idle() && *s != S::Error) {
            assert_eq!(state.on(T::Fault), Some(S::Error), "{state}");
        }
        assert_eq!(S::Idle.on(T::Fault), None);
        assert_eq!(S::Error.on(T::ResponseQueued), Some(S::Synthesizing));
        assert_eq!(S::Error.on(T::Abandoned), Some(S::Idle));
    }

    #[test]
    fn out_of_order_triggers_are_rejected() {
        assert_eq!(S::Idle.on(T::TranscriptReady), None);
        assert_eq!(S::Listening.on(T::TranscriptReady), None);
        assert_eq!(S::Capturing.on(T::Spoken), None);
        assert_eq!(S::Synthesizing.on(T::HandlerFinished), None);
    }
}
