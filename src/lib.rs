//! Voice Assistant - wake word to spoken answer
//!
//! This library provides the core of a voice-activated assistant:
//! - Event bus decoupling every pipeline stage
//! - Skill registry resolving free text to a handler
//! - Engine state machine with deadlines and a bounded worker pool
//! - Capability traits for speech and synthesis backends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            SpeechProvider (wake, capture, STT)       │
//! └────────────────────┬────────────────────────────────┘
//!                      │ events
//! ┌────────────────────▼────────────────────────────────┐
//! │                    EventBus                          │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │  AssistantEngine  │  SkillRegistry  │  WorkerPool   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ speak
//! ┌────────────────────▼────────────────────────────────┐
//! │               SynthesisProvider (TTS)                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod skills;
pub mod voice;

pub use config::Config;
pub use engine::{AssistantEngine, EngineStatus, PipelineState, SessionId, SessionOutcome, WorkerPool};
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventKind, EventPayload};
pub use skills::{Intent, IntentMatch, Skill, SkillError, SkillParams, SkillRegistry};
pub use voice::{SpeechProvider, SynthesisProvider};
