//! Console providers for text mode
//!
//! Typed lines stand in for transcripts and responses are printed. The
//! same wake word rules apply as with a microphone.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::{ListenConfig, SpeechProvider, SynthesisProvider, VoiceParams, WakeWordDetector};
use crate::events::{EventBus, EventPayload};
use crate::{Error, Result};

/// Reads commands from stdin
pub struct ConsoleSpeech {
    require_wake_word: bool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Default for ConsoleSpeech {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSpeech {
    /// Create a console provider that waits for the wake word
    #[must_use]
    pub const fn new() -> Self {
        Self {
            require_wake_word: true,
            cancel: Mutex::new(None),
        }
    }

    /// Treat every line as a wake word followed by a command
    #[must_use]
    pub const fn without_wake_word(mut self) -> Self {
        self.require_wake_word = false;
        self
    }
}

#[async_trait]
impl SpeechProvider for ConsoleSpeech {
    fn name(&self) -> &str {
        "console"
    }

    async fn start_listening(&self, config: &ListenConfig, bus: EventBus) -> Result<()> {
        let mut detector = WakeWordDetector::new(vec![config.wake_word.clone()], config.sensitivity)?;
        let require_wake_word = self.require_wake_word;

        let cancel = CancellationToken::new();
        {
            let mut slot = self
                .cancel
                .lock()
                .map_err(|_| Error::Provider("console state poisoned".to_string()))?;
            if slot.is_some() {
                return Ok(());
            }
            *slot = Some(cancel.clone());
        }

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    () = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };

                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        handle_line(line, require_wake_word, &mut detector, &bus);
                    }
                    Ok(None) => {
                        tracing::info!("stdin closed");
                        bus.publish(EventPayload::Shutdown);
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to read stdin");
                        bus.publish(EventPayload::speech_error(format!("stdin: {e}")));
                        break;
                    }
                }
            }
        });

        tracing::info!(wake_word = %config.wake_word, "console listening");
        Ok(())
    }

    async fn stop_listening(&self) -> Result<()> {
        let token = self
            .cancel
            .lock()
            .map_err(|_| Error::Provider("console state poisoned".to_string()))?
            .take();
        if let Some(token) = token {
            token.cancel();
        }
        Ok(())
    }
}

/// Turn one typed line into speech events
fn handle_line(line: &str, require_wake_word: bool, detector: &mut WakeWordDetector, bus: &EventBus) {
    let command = if !require_wake_word {
        bus.publish(EventPayload::WakeDetected {
            wake_word: String::new(),
        });
        line.to_string()
    } else {
        // A repeated wake word always starts over; the earlier session may
        // already have timed out
        let activated = detector.is_activated();
        match detector.check_wake_word(line) {
            Some(found) => {
                bus.publish(EventPayload::WakeDetected {
                    wake_word: found.wake_word,
                });
                if found.command.is_empty() {
                    return;
                }
                detector.reset();
                found.command
            }
            None if activated => line.to_string(),
            None => {
                tracing::trace!(line, "no wake word");
                return;
            }
        }
    };

    bus.publish(EventPayload::UtteranceCaptured { duration_ms: None });
    bus.publish(EventPayload::TranscriptReady { text: command });
}

/// Prints responses to stdout
#[derive(Debug, Default)]
pub struct ConsoleSynthesizer;

#[async_trait]
impl SynthesisProvider for ConsoleSynthesizer {
    fn name(&self) -> &str {
        "console"
    }

    async fn speak(&self, text: &str, voice: &VoiceParams) -> Result<()> {
        tracing::debug!(text, voice = %voice.voice, "speaking");
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("> {text}\n").as_bytes())
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))
    }
}
