//! Voice provider capabilities
//!
//! Wake word detection, capture, recognition and synthesis live behind two
//! narrow traits. The engine only ever sees their events on the bus and the
//! outcome of `speak`. Console implementations are bundled for text mode.

mod console;
mod wake_word;

use std::time::Duration;

use async_trait::async_trait;

pub use console::{ConsoleSpeech, ConsoleSynthesizer};
pub use wake_word::{DetectorState, WakeMatch, WakeWordDetector, extract_command};

use crate::Result;
use crate::events::EventBus;

/// Parameters passed through to the speech provider
#[derive(Debug, Clone, PartialEq)]
pub struct ListenConfig {
    /// Trigger phrase
    pub wake_word: String,
    /// Detection sensitivity (0.0 to 1.0)
    pub sensitivity: f32,
    /// Input device name (system default when unset)
    pub input_device: Option<String>,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Capture channel count
    pub channels: u16,
    /// Frames per capture chunk
    pub chunk_size: usize,
    /// Maximum time to wait for a phrase once capture starts
    pub capture_timeout: Duration,
    /// Recognition language
    pub language: String,
}

/// Voice parameters passed through to the synthesis provider
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    /// Voice identifier
    pub voice: String,
    /// Output volume multiplier
    pub volume: f32,
    /// Speaking rate multiplier
    pub rate: f32,
    /// Pitch multiplier
    pub pitch: f32,
}

/// Wake word detection, audio capture and speech-to-text
///
/// Once listening, a provider publishes `WakeDetected`, `UtteranceCaptured`
/// and `TranscriptReady` on the bus. Backend failures are published as
/// `ErrorOccurred` with [`crate::events::ErrorOrigin::Speech`].
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Start emitting speech events on `bus`
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be initialized; the engine treats
    /// this as fatal
    async fn start_listening(&self, config: &ListenConfig, bus: EventBus) -> Result<()>;

    /// Stop emitting events
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails to shut down cleanly
    async fn stop_listening(&self) -> Result<()>;
}

/// Text-to-speech
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Speak `text` and return once playback has finished
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` if the backend fails
    async fn speak(&self, text: &str, voice: &VoiceParams) -> Result<()>;
}
