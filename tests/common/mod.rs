//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voice_assistant::events::handler_fn;
use voice_assistant::skills::Intent;
use voice_assistant::voice::{ListenConfig, VoiceParams};
use voice_assistant::{
    AssistantEngine, Config, EngineStatus, Error, Event, EventBus, EventKind, EventPayload,
    Result, SessionOutcome, Skill, SkillError, SkillParams, SkillRegistry, SpeechProvider,
    SynthesisProvider,
};

/// Generous upper bound for anything the tests wait on
pub const WAIT: Duration = Duration::from_secs(3);

/// Config with sub-second deadlines
#[must_use]
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.engine.hotword_timeout = Duration::from_millis(300);
    config.engine.response_timeout = Duration::from_millis(300);
    config.engine.synthesis_timeout = Duration::from_millis(300);
    config
}

/// Speech provider that does nothing; tests publish speech events directly
#[derive(Default)]
pub struct SilentSpeech {
    pub started: AtomicBool,
}

#[async_trait]
impl SpeechProvider for SilentSpeech {
    fn name(&self) -> &str {
        "silent"
    }

    async fn start_listening(&self, _config: &ListenConfig, _bus: EventBus) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_listening(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Speech provider whose backend cannot start
pub struct BrokenSpeech;

#[async_trait]
impl SpeechProvider for BrokenSpeech {
    fn name(&self) -> &str {
        "broken"
    }

    async fn start_listening(&self, _config: &ListenConfig, _bus: EventBus) -> Result<()> {
        Err(Error::Provider("no microphone".to_string()))
    }

    async fn stop_listening(&self) -> Result<()> {
        Ok(())
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Default)]
pub struct RecordingSynth {
    spoken: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingSynth {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A synthesizer whose every call fails
    #[must_use]
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisProvider for RecordingSynth {
    fn name(&self) -> &str {
        "recording"
    }

    async fn speak(&self, text: &str, _voice: &VoiceParams) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(Error::Synthesis("speaker unplugged".to_string()));
        }
        Ok(())
    }
}

/// Synthesizer that never finishes speaking
#[derive(Default)]
pub struct HangingSynth {
    /// Set once the speaking future is dropped
    pub abandoned: Arc<AtomicBool>,
}

#[async_trait]
impl SynthesisProvider for HangingSynth {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn speak(&self, _text: &str, _voice: &VoiceParams) -> Result<()> {
        let _flag = DropFlag(Arc::clone(&self.abandoned));
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Skill answering one phrase with fixed text
pub struct FixedSkill {
    pub name: &'static str,
    pub phrase: &'static str,
    pub response: &'static str,
}

#[async_trait]
impl Skill for FixedSkill {
    fn name(&self) -> &str {
        self.name
    }

    fn intents(&self) -> Vec<Intent> {
        vec![Intent::phrase(self.phrase, "answer")]
    }

    async fn execute(
        &self,
        _handler: &str,
        _params: &SkillParams,
        _cancel: CancellationToken,
    ) -> std::result::Result<String, SkillError> {
        Ok(self.response.to_string())
    }
}

/// Skill whose handler always fails
pub struct FailingSkill;

#[async_trait]
impl Skill for FailingSkill {
    fn name(&self) -> &str {
        "weather"
    }

    fn intents(&self) -> Vec<Intent> {
        vec![Intent::phrase("what's the weather", "forecast")]
    }

    async fn execute(
        &self,
        _handler: &str,
        _params: &SkillParams,
        _cancel: CancellationToken,
    ) -> std::result::Result<String, SkillError> {
        Err(SkillError::new("network down"))
    }
}

/// Sets its flag when the owning future is dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Skill whose handler never returns
#[derive(Default)]
pub struct NeverSkill {
    pub abandoned: Arc<AtomicBool>,
}

#[async_trait]
impl Skill for NeverSkill {
    fn name(&self) -> &str {
        "stuck"
    }

    fn intents(&self) -> Vec<Intent> {
        vec![Intent::phrase("do the impossible", "forever")]
    }

    async fn execute(
        &self,
        _handler: &str,
        _params: &SkillParams,
        _cancel: CancellationToken,
    ) -> std::result::Result<String, SkillError> {
        let _flag = DropFlag(Arc::clone(&self.abandoned));
        std::future::pending::<()>().await;
        Ok(String::new())
    }
}

/// Skill that only records being stopped
#[derive(Default)]
pub struct TidySkill {
    pub stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Skill for TidySkill {
    fn name(&self) -> &str {
        "tidy"
    }

    fn intents(&self) -> Vec<Intent> {
        vec![Intent::phrase("clean up", "sweep")]
    }

    async fn execute(
        &self,
        _handler: &str,
        _params: &SkillParams,
        _cancel: CancellationToken,
    ) -> std::result::Result<String, SkillError> {
        Ok("All clean".to_string())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Registry with a clock skill answering "It is 3 PM"
#[must_use]
pub fn clock_registry() -> SkillRegistry {
    let mut registry = SkillRegistry::default();
    registry
        .register(FixedSkill {
            name: "clock",
            phrase: "what time is it",
            response: "It is 3 PM",
        })
        .unwrap();
    registry
}

/// A running engine plus everything a test needs to drive and observe it
pub struct Harness {
    pub bus: EventBus,
    pub synth: Arc<RecordingSynth>,
    pub status: watch::Receiver<EngineStatus>,
    pub shutdown: CancellationToken,
    pub events: mpsc::UnboundedReceiver<Arc<Event>>,
    pub handle: JoinHandle<Result<()>>,
}

impl Harness {
    pub async fn start(config: Config, registry: SkillRegistry) -> Self {
        Self::start_with(config, registry, RecordingSynth::new(), |engine| engine).await
    }

    /// Start an engine, letting the caller adjust it before it runs
    pub async fn start_with<F>(
        config: Config,
        registry: SkillRegistry,
        synth: Arc<RecordingSynth>,
        customize: F,
    ) -> Self
    where
        F: FnOnce(AssistantEngine) -> AssistantEngine,
    {
        let speaker = Arc::clone(&synth) as Arc<dyn SynthesisProvider>;
        Self::launch(config, registry, synth, speaker, customize).await
    }

    /// Start an engine that speaks through `speaker`; `synth` stays empty
    pub async fn start_with_synthesizer(
        config: Config,
        registry: SkillRegistry,
        speaker: Arc<dyn SynthesisProvider>,
    ) -> Self {
        Self::launch(config, registry, RecordingSynth::new(), speaker, |engine| engine).await
    }

    async fn launch<F>(
        config: Config,
        registry: SkillRegistry,
        synth: Arc<RecordingSynth>,
        speaker: Arc<dyn SynthesisProvider>,
        customize: F,
    ) -> Self
    where
        F: FnOnce(AssistantEngine) -> AssistantEngine,
    {
        let engine = customize(AssistantEngine::new(
            Arc::new(config),
            registry,
            Arc::new(SilentSpeech::default()),
            speaker,
        ));

        let bus = engine.bus().clone();
        let (tx, events) = mpsc::unbounded_channel();
        bus.subscribe_all(handler_fn(move |event| {
            let _ = tx.send(event);
            Ok(())
        }));

        let status = engine.status();
        let shutdown = engine.shutdown_token();
        let handle = tokio::spawn(engine.run());

        // Wait for the engine's own subscription
        tokio::time::timeout(WAIT, async {
            while bus.subscriber_count() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine never subscribed");

        Self {
            bus,
            synth,
            status,
            shutdown,
            events,
            handle,
        }
    }

    pub fn wake(&self) {
        self.bus.publish(EventPayload::WakeDetected {
            wake_word: "jetson".to_string(),
        });
    }

    /// Publish a captured utterance and its transcript
    pub fn say(&self, text: &str) {
        self.bus
            .publish(EventPayload::UtteranceCaptured { duration_ms: Some(800) });
        self.bus.publish(EventPayload::TranscriptReady {
            text: text.to_string(),
        });
    }

    /// Next event of `kind`, skipping others
    pub async fn next_of(&mut self, kind: EventKind) -> Arc<Event> {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("bus closed");
                if event.kind() == kind {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {kind} event"))
    }

    pub async fn next_outcome(&mut self) -> SessionOutcome {
        match &self.next_of(EventKind::SessionEnded).await.payload {
            EventPayload::SessionEnded { outcome } => *outcome,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    /// Wait until the engine reports idle
    pub async fn wait_idle(&mut self) {
        tokio::time::timeout(WAIT, self.status.wait_for(|s| s.state.is_idle() && s.session_id.is_none()))
            .await
            .expect("engine never went idle")
            .expect("engine dropped");
    }

    /// Events received so far that have not been consumed
    pub fn drain(&mut self) -> Vec<Arc<Event>> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("engine did not stop")
            .expect("engine panicked")
            .expect("engine failed");
    }
}
