//! Assistant engine
//!
//! A single control loop owns the active [`Session`] and applies every state
//! transition. Providers and skill handlers run in their own tasks and report
//! back through the loop's inbox, tagged with the session they belong to, so
//! results from a session that has already ended are recognized and dropped.

mod pool;
mod session;
mod state;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use pool::WorkerPool;
pub use session::{FailureKind, Session, SessionId, SessionOutcome};
pub use state::{PipelineState, Trigger};

use crate::config::Config;
use crate::events::{ErrorOrigin, Event, EventBus, EventKind, EventPayload, handler_fn};
use crate::skills::{IntentMatch, SkillError, SkillRegistry};
use crate::voice::{SpeechProvider, SynthesisProvider, VoiceParams};
use crate::{Error, Result};

const NO_MATCH_RESPONSE: &str = "Sorry, I didn't understand that.";
const EMPTY_TRANSCRIPT_RESPONSE: &str = "Sorry, I didn't catch that.";
const TIMEOUT_RESPONSE: &str = "Sorry, that took too long.";
const BUSY_RESPONSE: &str = "I'm busy right now, please try again in a moment.";
const SKILL_FAILED_RESPONSE: &str = "Sorry, I couldn't complete that request.";
const PROVIDER_FAILED_RESPONSE: &str = "Sorry, I'm having trouble hearing you.";

/// Snapshot published on every state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatus {
    pub state: PipelineState,
    pub session_id: Option<SessionId>,
}

/// Orchestrates wake word, recognition, dispatch and synthesis
pub struct AssistantEngine {
    config: Arc<Config>,
    registry: Arc<SkillRegistry>,
    speech: Arc<dyn SpeechProvider>,
    synthesizer: Arc<dyn SynthesisProvider>,
    voice: VoiceParams,
    bus: EventBus,
    pool: WorkerPool,
    shutdown: CancellationToken,
    status: watch::Sender<EngineStatus>,
}

impl AssistantEngine {
    /// Create an engine; the registry is frozen from here on
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        registry: SkillRegistry,
        speech: Arc<dyn SpeechProvider>,
        synthesizer: Arc<dyn SynthesisProvider>,
    ) -> Self {
        let (status, _) = watch::channel(EngineStatus::default());
        Self {
            voice: config.voice_params(),
            pool: WorkerPool::new(config.engine.max_workers),
            config,
            registry: Arc::new(registry),
            speech,
            synthesizer,
            bus: EventBus::new(),
            shutdown: CancellationToken::new(),
            status,
        }
    }

    /// Use an existing bus instead of a private one
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Share a worker pool with other users
    #[must_use]
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Watch state changes
    #[must_use]
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Token that stops [`Self::run`] when cancelled
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token fires or a `Shutdown` event arrives
    ///
    /// # Errors
    ///
    /// Returns error only if the speech provider fails to start
    pub async fn run(self) -> Result<()> {
        let (inbox, mut rx) = mpsc::unbounded_channel();

        // One subscription keeps cross-kind order intact
        let forward = inbox.clone();
        let subscription = self.bus.subscribe_many(
            &[
                EventKind::WakeDetected,
                EventKind::UtteranceCaptured,
                EventKind::TranscriptReady,
                EventKind::ErrorOccurred,
                EventKind::Shutdown,
            ],
            handler_fn(move |event| {
                forward
                    .send(Inbox::Event(event))
                    .map_err(|_| Error::EventHandler("engine inbox closed".to_string()))
            }),
        );

        if let Err(e) = self
            .speech
            .start_listening(&self.config.listen_config(), self.bus.clone())
            .await
        {
            tracing::error!(provider = self.speech.name(), error = %e, "speech provider failed to start");
            self.bus.unsubscribe(subscription);
            return Err(e);
        }

        tracing::info!(
            speech = self.speech.name(),
            synthesis = self.synthesizer.name(),
            skills = self.registry.len(),
            workers = self.pool.capacity(),
            "assistant engine running"
        );

        let mut control = ControlLoop {
            engine: &self,
            inbox,
            active: None,
        };

        loop {
            let deadline = control.deadline();
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    control.on_deadline();
                }
                Some(message) = rx.recv() => control.handle(message),
            }
        }

        control.abandon();
        self.bus.unsubscribe(subscription);
        if let Err(e) = self.speech.stop_listening().await {
            tracing::warn!(provider = self.speech.name(), error = %e, "speech provider did not stop cleanly");
        }
        for skill in self.registry.skills() {
            tracing::debug!(skill = skill.name(), "stopping skill");
            if AssertUnwindSafe(skill.stop()).catch_unwind().await.is_err() {
                tracing::error!(skill = skill.name(), "skill panicked while stopping");
            }
        }
        self.status.send_replace(EngineStatus::default());
        tracing::info!("assistant engine stopped");
        Ok(())
    }

    /// Resolve and execute one utterance without speaking the answer
    ///
    /// # Errors
    ///
    /// Returns the skill's error, `Error::WorkerPoolExhausted`, or
    /// `Error::DeadlineExceeded` when the handler overruns the response timeout
    pub async fn process_text(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(EMPTY_TRANSCRIPT_RESPONSE.to_string());
        }
        let Some(found) = self.registry.resolve(text) else {
            return Ok(NO_MATCH_RESPONSE.to_string());
        };
        tracing::debug!(skill = found.skill_name(), handler = %found.handler, score = found.score, "processing text");

        let cancel = CancellationToken::new();
        let IntentMatch {
            skill,
            handler,
            params,
            ..
        } = found;
        let token = cancel.clone();
        let handle = self.pool.submit(cancel.clone(), async move {
            catch_skill_panic(skill.execute(&handler, &params, token)).await
        })?;

        match tokio::time::timeout(self.config.engine.response_timeout, handle).await {
            Ok(Ok(Some(result))) => result.map_err(Error::from),
            Ok(Ok(None)) | Err(_) => {
                cancel.cancel();
                Err(Error::DeadlineExceeded(PipelineState::Dispatching.activity()))
            }
            Ok(Err(e)) => Err(SkillError::new(e.to_string()).into()),
        }
    }
}

/// Messages for the control loop
enum Inbox {
    Event(Arc<Event>),
    SkillFinished {
        session: SessionId,
        result: std::result::Result<String, SkillError>,
    },
    Spoken {
        session: SessionId,
        result: Result<()>,
    },
}

/// The session in flight plus the work it owns
struct Active {
    session: Session,
    skill_cancel: Option<CancellationToken>,
    speaking: Option<(String, AbortHandle)>,
}

impl Active {
    fn stop_work(&mut self) {
        if let Some(cancel) = self.skill_cancel.take() {
            cancel.cancel();
        }
        if let Some((_, speaking)) = self.speaking.take() {
            speaking.abort();
        }
    }
}

struct ControlLoop<'a> {
    engine: &'a AssistantEngine,
    inbox: mpsc::UnboundedSender<Inbox>,
    active: Option<Active>,
}

impl ControlLoop<'_> {
    fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.session.deadline)
    }

    fn current(&self) -> Option<(SessionId, PipelineState)> {
        self.active.as_ref().map(|a| (a.session.id, a.session.state))
    }

    fn handle(&mut self, message: Inbox) {
        match message {
            Inbox::Event(event) => self.on_event(&event),
            Inbox::SkillFinished { session, result } => self.on_skill_finished(session, result),
            Inbox::Spoken { session, result } => self.on_spoken(session, result),
        }
    }

    fn on_event(&mut self, event: &Event) {
        if let Some(tagged) = event.session_id {
            if self.current().map(|(id, _)| id) != Some(tagged) && event.kind() != EventKind::Shutdown {
                tracing::debug!(%event, "discarding event for ended session");
                return;
            }
        }

        match &event.payload {
            EventPayload::WakeDetected { wake_word } => self.on_wake(wake_word),
            EventPayload::UtteranceCaptured { duration_ms } => {
                if self.transition(Trigger::UtteranceCaptured) {
                    tracing::debug!(?duration_ms, "utterance captured");
                    self.arm(self.engine.config.engine.response_timeout);
                }
            }
            EventPayload::TranscriptReady { text } => self.on_transcript(text),
            EventPayload::ErrorOccurred {
                origin: ErrorOrigin::Speech,
                message,
            } => self.on_speech_error(message),
            EventPayload::Shutdown => {
                tracing::info!("shutdown requested");
                self.engine.shutdown.cancel();
            }
            _ => {}
        }
    }

    fn on_wake(&mut self, wake_word: &str) {
        if let Some((id, state)) = self.current() {
            tracing::debug!(session = %id, %state, "wake word ignored, session active");
            return;
        }

        let session = Session::start(Instant::now() + self.engine.config.engine.hotword_timeout);
        let id = session.id;
        self.active = Some(Active {
            session,
            skill_cancel: None,
            speaking: None,
        });
        if !self.transition(Trigger::WakeDetected) {
            self.active = None;
            return;
        }
        tracing::info!(session = %id, wake_word, "session started");
    }

    fn on_transcript(&mut self, text: &str) {
        if !self.transition(Trigger::TranscriptReady) {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.session.transcript = text.to_string();
        let id = active.session.id;
        tracing::info!(session = %id, transcript = text, "transcript ready");

        if text.trim().is_empty() {
            self.transition(Trigger::NoMatch);
            self.speak(EMPTY_TRANSCRIPT_RESPONSE.to_string(), SessionOutcome::Responded);
            return;
        }

        match self.engine.registry.resolve(text) {
            Some(found) => {
                self.engine.bus.publish_session(
                    id,
                    EventPayload::IntentResolved {
                        skill: found.skill_name().to_string(),
                        pattern: found.pattern.clone(),
                        score: found.score,
                        params: found.params.clone(),
                    },
                );
                self.transition(Trigger::Matched);
                self.dispatch(id, found);
            }
            None => {
                self.transition(Trigger::NoMatch);
                self.speak(NO_MATCH_RESPONSE.to_string(), SessionOutcome::Responded);
            }
        }
    }

    fn dispatch(&mut self, session: SessionId, found: IntentMatch) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inbox = self.inbox.clone();
        let skill_name = found.skill_name().to_string();
        let IntentMatch {
            skill,
            handler,
            params,
            ..
        } = found;

        tracing::debug!(session = %session, skill = %skill_name, %handler, "dispatching");
        let task = async move {
            let result = catch_skill_panic(skill.execute(&handler, &params, token)).await;
            let _ = inbox.send(Inbox::SkillFinished { session, result });
        };

        match self.engine.pool.submit(cancel.clone(), task) {
            Ok(_) => {
                if let Some(active) = self.active.as_mut() {
                    active.skill_cancel = Some(cancel);
                }
            }
            Err(e) => {
                tracing::warn!(session = %session, skill = %skill_name, error = %e, "dispatch rejected");
                self.engine.bus.publish_session(
                    session,
                    EventPayload::ErrorOccurred {
                        origin: ErrorOrigin::Engine,
                        message: e.to_string(),
                    },
                );
                self.fail(FailureKind::WorkerPoolExhausted, Some(BUSY_RESPONSE));
            }
        }
    }

    fn on_skill_finished(&mut self, session: SessionId, result: std::result::Result<String, SkillError>) {
        if self.current() != Some((session, PipelineState::Dispatching)) {
            tracing::debug!(session = %session, "discarding late skill result");
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.skill_cancel = None;
        }
        self.transition(Trigger::HandlerFinished);

        match result {
            Ok(text) => self.speak(text, SessionOutcome::Responded),
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "skill failed");
                self.engine.bus.publish_session(
                    session,
                    EventPayload::ErrorOccurred {
                        origin: ErrorOrigin::Skill,
                        message: e.reason,
                    },
                );
                self.speak(
                    SKILL_FAILED_RESPONSE.to_string(),
                    SessionOutcome::Failed(FailureKind::Skill),
                );
            }
        }
    }

    fn on_speech_error(&mut self, message: &str) {
        let Some((id, state)) = self.current() else {
            tracing::warn!(error = message, "speech provider error while idle");
            return;
        };
        if !matches!(
            state,
            PipelineState::Listening | PipelineState::Capturing | PipelineState::Recognizing
        ) {
            tracing::debug!(session = %id, %state, error = message, "speech provider error ignored");
            return;
        }

        tracing::warn!(session = %id, error = message, "speech provider failed");
        self.fail(FailureKind::Provider, Some(PROVIDER_FAILED_RESPONSE));
    }

    fn on_spoken(&mut self, session: SessionId, result: Result<()>) {
        if self.current().map(|(id, _)| id) != Some(session) {
            tracing::debug!(session = %session, "discarding late synthesis result");
            return;
        }
        let Some((text, _)) = self.active.as_mut().and_then(|a| a.speaking.take()) else {
            return;
        };

        match result {
            Ok(()) => {
                self.engine
                    .bus
                    .publish_session(session, EventPayload::ResponseReady { text });
                self.transition(Trigger::Spoken);
                let outcome = self
                    .active
                    .as_ref()
                    .map_or(SessionOutcome::Responded, |a| a.session.pending_outcome);
                self.end(outcome);
            }
            Err(e) => {
                tracing::error!(session = %session, error = %e, "synthesis failed");
                self.engine.bus.publish_session(
                    session,
                    EventPayload::ErrorOccurred {
                        origin: ErrorOrigin::Synthesis,
                        message: e.to_string(),
                    },
                );
                self.fail(FailureKind::Provider, None);
            }
        }
    }

    fn on_deadline(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let state = active.session.state;
        let err = Error::DeadlineExceeded(state.activity());
        tracing::warn!(session = %active.session.id, %state, error = %err, "deadline exceeded");

        active.stop_work();
        self.transition(Trigger::Deadline);
        if state == PipelineState::Dispatching {
            // The handler is abandoned, not awaited
            self.speak(TIMEOUT_RESPONSE.to_string(), SessionOutcome::TimedOut);
        } else {
            self.end(SessionOutcome::TimedOut);
        }
    }

    /// Move through `Error` to either an apology or straight to idle
    fn fail(&mut self, kind: FailureKind, response: Option<&str>) {
        if !self.transition(Trigger::Fault) {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.stop_work();
        }

        match response {
            Some(text) => {
                self.transition(Trigger::ResponseQueued);
                self.speak(text.to_string(), SessionOutcome::Failed(kind));
            }
            None => {
                self.transition(Trigger::Abandoned);
                self.end(SessionOutcome::Failed(kind));
            }
        }
    }

    /// Start speaking `text`; `outcome` is reported once it has been spoken
    fn speak(&mut self, text: String, outcome: SessionOutcome) {
        let synthesis_timeout = self.engine.config.engine.synthesis_timeout;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.session.pending_outcome = outcome;
        active.session.deadline = Instant::now() + synthesis_timeout;

        let session = active.session.id;
        let synthesizer = Arc::clone(&self.engine.synthesizer);
        let voice = self.engine.voice.clone();
        let inbox = self.inbox.clone();
        let spoken = text.clone();
        let task = tokio::spawn(async move {
            let result = synthesizer.speak(&spoken, &voice).await;
            let _ = inbox.send(Inbox::Spoken { session, result });
        });

        tracing::debug!(session = %session, text = %text, "speaking");
        active.speaking = Some((text, task.abort_handle()));
    }

    fn end(&mut self, outcome: SessionOutcome) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.stop_work();

        let id = active.session.id;
        let elapsed = Utc::now() - active.session.started_at;
        tracing::info!(session = %id, %outcome, elapsed_ms = elapsed.num_milliseconds(), "session ended");

        self.engine
            .bus
            .publish_session(id, EventPayload::SessionEnded { outcome });
        self.publish_status();
    }

    /// End whatever is in flight when the loop stops
    fn abandon(&mut self) {
        if let Some((id, state)) = self.current() {
            tracing::info!(session = %id, %state, "abandoning session on shutdown");
            self.end(SessionOutcome::TimedOut);
        }
    }

    fn arm(&mut self, budget: Duration) {
        if let Some(active) = self.active.as_mut() {
            active.session.deadline = Instant::now() + budget;
        }
    }

    fn transition(&mut self, trigger: Trigger) -> bool {
        let Some(active) = self.active.as_mut() else {
            tracing::trace!(?trigger, "no session");
            return false;
        };
        let from = active.session.state;
        let Some(to) = from.on(trigger) else {
            tracing::debug!(session = %active.session.id, state = %from, ?trigger, "trigger ignored");
            return false;
        };
        active.session.state = to;
        tracing::debug!(session = %active.session.id, %from, %to, ?trigger, "transition");
        self.publish_status();
        true
    }

    fn publish_status(&self) {
        let status = self.active.as_ref().map_or_else(EngineStatus::default, |a| EngineStatus {
            state: a.session.state,
            session_id: Some(a.session.id),
        });
        self.engine.status.send_replace(status);
    }
}

/// Turn a panicking handler into a skill error
async fn catch_skill_panic<F>(future: F) -> std::result::Result<String, SkillError>
where
    F: std::future::Future<Output = std::result::Result<String, SkillError>>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(SkillError::new("skill panicked")))
}
