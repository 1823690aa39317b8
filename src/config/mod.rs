//! Configuration management for the voice assistant
//!
//! The engine consumes configuration as an immutable snapshot: it is resolved
//! once at startup (env > toml > default) and never mutated afterwards.

pub mod file;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::voice::{ListenConfig, VoiceParams};
use crate::{Error, Result};

use self::file::AssistantConfigFile;

/// Default wake word
pub const DEFAULT_WAKE_WORD: &str = "jetson";

/// Voice assistant configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Wake word configuration
    pub wake_word: WakeWordConfig,

    /// Audio device and format
    pub audio: AudioConfig,

    /// Speech recognition backend
    pub speech: SpeechConfig,

    /// Text-to-speech backend and voice
    pub tts: TtsConfig,

    /// Engine timeouts and worker pool
    pub engine: EngineConfig,

    /// Logging
    pub logging: LoggingConfig,

    /// Per-skill settings keyed by skill name
    pub skills: BTreeMap<String, SkillConfig>,

    /// File this snapshot was loaded from, if any
    pub source: Option<PathBuf>,
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Listen for the wake word at all
    pub enabled: bool,

    /// Trigger phrase
    pub word: String,

    /// Detection sensitivity (0.0 to 1.0)
    pub sensitivity: f32,

    /// Detection backend name
    pub engine: String,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            word: DEFAULT_WAKE_WORD.to_string(),
            sensitivity: 0.5,
            engine: "text".to_string(),
        }
    }
}

/// Audio device and format configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Input device name (system default when unset)
    pub input_device: Option<String>,

    /// Output device name (system default when unset)
    pub output_device: Option<String>,

    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Capture channel count
    pub channels: u16,

    /// Frames per capture chunk
    pub chunk_size: usize,

    /// Maximum time to wait for a phrase once capture starts
    pub capture_timeout: Duration,

    /// Energy level treated as speech
    pub energy_threshold: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            capture_timeout: Duration::from_secs(5),
            energy_threshold: 300,
        }
    }
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Recognition backend name
    pub engine: String,

    /// BCP 47 language tag
    pub language: String,

    /// Prefer an offline backend
    pub offline_mode: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            engine: "console".to_string(),
            language: "en-US".to_string(),
            offline_mode: false,
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Synthesis backend name
    pub engine: String,

    /// Voice identifier
    pub voice: String,

    /// Output volume multiplier
    pub volume: f32,

    /// Speaking rate multiplier
    pub rate: f32,

    /// Pitch multiplier
    pub pitch: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: "console".to_string(),
            voice: "en-US".to_string(),
            volume: 1.0,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Engine timeouts, worker pool and matching threshold
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Budget for hearing the start of a command after the wake word
    pub hotword_timeout: Duration,

    /// Budget from captured utterance to a finished skill
    pub response_timeout: Duration,

    /// Budget for speaking the response
    pub synthesis_timeout: Duration,

    /// Skill handlers allowed to run at once
    pub max_workers: usize,

    /// Minimum intent score accepted by the registry
    pub match_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hotword_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
            synthesis_timeout: Duration::from_secs(15),
            max_workers: 4,
            match_threshold: 0.75,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when neither `-v` nor `RUST_LOG` is given
    pub level: String,

    /// Write logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Settings for one skill
#[derive(Debug, Clone)]
pub struct SkillConfig {
    /// Register the skill at startup
    pub enabled: bool,

    /// Skill-specific parameters
    pub params: BTreeMap<String, toml::Value>,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            params: BTreeMap::new(),
        }
    }
}

impl SkillConfig {
    /// Get a string parameter
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(toml::Value::as_str)
    }
}

impl Config {
    /// Load configuration from an explicit file or the standard path
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly named file cannot be loaded, or if
    /// the resolved values fail validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (fc, source) = match path {
            Some(p) => (file::load_config_file_from(p)?, Some(p.to_path_buf())),
            None => {
                let source = file::config_file_path().filter(|p| p.exists());
                (file::load_config_file(), source)
            }
        };

        let mut config = Self::resolve(fc, |key| std::env::var(key).ok())?;
        config.source = source;
        Ok(config)
    }

    /// Resolve a file overlay and environment lookups into a validated snapshot
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn resolve<F>(fc: AssistantConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Wake word (env > toml > default)
        let wake_word = WakeWordConfig {
            enabled: fc.wake_word.enabled.unwrap_or(defaults.wake_word.enabled),
            word: env("ASSISTANT_WAKE_WORD")
                .or(fc.wake_word.word)
                .unwrap_or(defaults.wake_word.word)
                .trim()
                .to_string(),
            sensitivity: fc
                .wake_word
                .sensitivity
                .unwrap_or(defaults.wake_word.sensitivity),
            engine: fc.wake_word.engine.unwrap_or(defaults.wake_word.engine),
        };

        let audio = AudioConfig {
            input_device: fc.audio.input_device,
            output_device: fc.audio.output_device,
            sample_rate: fc.audio.sample_rate.unwrap_or(defaults.audio.sample_rate),
            channels: fc.audio.channels.unwrap_or(defaults.audio.channels),
            chunk_size: fc.audio.chunk_size.unwrap_or(defaults.audio.chunk_size),
            capture_timeout: fc
                .audio
                .timeout
                .map(|s| seconds("audio.timeout", s))
                .transpose()?
                .unwrap_or(defaults.audio.capture_timeout),
            energy_threshold: fc
                .audio
                .energy_threshold
                .unwrap_or(defaults.audio.energy_threshold),
        };

        let speech = SpeechConfig {
            engine: fc.speech.engine.unwrap_or(defaults.speech.engine),
            language: fc.speech.language.unwrap_or(defaults.speech.language),
            offline_mode: fc
                .speech
                .offline_mode
                .unwrap_or(defaults.speech.offline_mode),
        };

        let tts = TtsConfig {
            engine: fc.tts.engine.unwrap_or(defaults.tts.engine),
            voice: fc.tts.voice.unwrap_or(defaults.tts.voice),
            volume: fc.tts.volume.unwrap_or(defaults.tts.volume),
            rate: fc.tts.rate.unwrap_or(defaults.tts.rate),
            pitch: fc.tts.pitch.unwrap_or(defaults.tts.pitch),
        };

        // Engine (env > toml > default)
        let hotword_timeout = env_parse::<f64, _>(&env, "ASSISTANT_HOTWORD_TIMEOUT")?
            .or(fc.engine.hotword_timeout)
            .map(|s| seconds("engine.hotword_timeout", s))
            .transpose()?
            .unwrap_or(defaults.engine.hotword_timeout);
        let response_timeout = env_parse::<f64, _>(&env, "ASSISTANT_RESPONSE_TIMEOUT")?
            .or(fc.engine.response_timeout)
            .map(|s| seconds("engine.response_timeout", s))
            .transpose()?
            .unwrap_or(defaults.engine.response_timeout);
        let synthesis_timeout = fc
            .engine
            .synthesis_timeout
            .map(|s| seconds("engine.synthesis_timeout", s))
            .transpose()?
            .unwrap_or(defaults.engine.synthesis_timeout);
        let engine = EngineConfig {
            hotword_timeout,
            response_timeout,
            synthesis_timeout,
            max_workers: env_parse(&env, "ASSISTANT_MAX_WORKERS")?
                .or(fc.engine.max_workers)
                .unwrap_or(defaults.engine.max_workers),
            match_threshold: env_parse(&env, "ASSISTANT_MATCH_THRESHOLD")?
                .or(fc.engine.match_threshold)
                .unwrap_or(defaults.engine.match_threshold),
        };

        let logging = LoggingConfig {
            level: env("ASSISTANT_LOG_LEVEL")
                .or(fc.logging.level)
                .unwrap_or(defaults.logging.level),
            file: fc.logging.file.map(PathBuf::from),
        };

        let skills = fc
            .skills
            .into_iter()
            .map(|(name, sc)| {
                let config = SkillConfig {
                    enabled: sc.enabled.unwrap_or(true),
                    params: sc.params,
                };
                (name, config)
            })
            .collect();

        let config = Self {
            wake_word,
            audio,
            speech,
            tts,
            engine,
            logging,
            skills,
            source: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.wake_word.enabled && self.wake_word.word.is_empty() {
            return Err(Error::Config("wake_word.word must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.wake_word.sensitivity) {
            return Err(Error::Config(format!(
                "wake_word.sensitivity must be between 0 and 1, got {}",
                self.wake_word.sensitivity
            )));
        }
        if self.engine.max_workers == 0 {
            return Err(Error::Config("engine.max_workers must be at least 1".to_string()));
        }
        let threshold = self.engine.match_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Config(format!(
                "engine.match_threshold must be in (0, 1], got {threshold}"
            )));
        }
        for (field, value) in [
            ("tts.volume", self.tts.volume),
            ("tts.rate", self.tts.rate),
            ("tts.pitch", self.tts.pitch),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{field} must be positive, got {value}")));
            }
        }
        Ok(())
    }

    /// Settings for a skill (defaults when the config has no table for it)
    #[must_use]
    pub fn skill(&self, name: &str) -> SkillConfig {
        self.skills.get(name).cloned().unwrap_or_default()
    }

    /// Whether a skill should be registered
    #[must_use]
    pub fn skill_enabled(&self, name: &str) -> bool {
        self.skills.get(name).is_none_or(|s| s.enabled)
    }

    /// Parameters handed to the speech provider, unchanged from this snapshot
    #[must_use]
    pub fn listen_config(&self) -> ListenConfig {
        ListenConfig {
            wake_word: self.wake_word.word.clone(),
            sensitivity: self.wake_word.sensitivity,
            input_device: self.audio.input_device.clone(),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            chunk_size: self.audio.chunk_size,
            capture_timeout: self.audio.capture_timeout,
            language: self.speech.language.clone(),
        }
    }

    /// Parameters handed to the synthesis provider
    #[must_use]
    pub fn voice_params(&self) -> VoiceParams {
        VoiceParams {
            voice: self.tts.voice.clone(),
            volume: self.tts.volume,
            rate: self.tts.rate,
            pitch: self.tts.pitch,
        }
    }
}

/// Convert a positive number of seconds into a `Duration`
fn seconds(field: &str, value: f64) -> Result<Duration> {
    if !(value.is_finite() && value > 0.0) {
        return Err(Error::Config(format!(
            "{field} must be a positive number of seconds, got {value}"
        )));
    }
    Ok(Duration::from_secs_f64(value))
}

/// Parse an optional environment override
fn env_parse<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}")))
        })
        .transpose()
}
