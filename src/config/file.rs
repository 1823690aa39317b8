//! TOML configuration file loading
//!
//! Supports `~/.config/voice-assistant/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AssistantConfigFile {
    /// Wake word configuration
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Audio device and format configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Engine timeouts and worker pool
    #[serde(default)]
    pub engine: EngineFileConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingFileConfig,

    /// Per-skill tables, keyed by skill name
    #[serde(default)]
    pub skills: BTreeMap<String, SkillFileConfig>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    pub enabled: Option<bool>,
    /// Trigger phrase (e.g. "jetson")
    pub word: Option<String>,
    /// Detection sensitivity between 0.0 and 1.0
    pub sensitivity: Option<f32>,
    /// Detection backend name
    pub engine: Option<String>,
}

/// Audio device and format configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub chunk_size: Option<usize>,
    /// Capture timeout in seconds
    pub timeout: Option<f64>,
    pub energy_threshold: Option<u32>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    pub engine: Option<String>,
    pub language: Option<String>,
    pub offline_mode: Option<bool>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub engine: Option<String>,
    pub voice: Option<String>,
    pub volume: Option<f32>,
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
}

/// Engine configuration (timeouts in seconds)
#[derive(Debug, Default, Deserialize)]
pub struct EngineFileConfig {
    pub hotword_timeout: Option<f64>,
    pub response_timeout: Option<f64>,
    pub synthesis_timeout: Option<f64>,
    pub max_workers: Option<usize>,
    pub match_threshold: Option<f32>,
}

/// Logging configuration
#[derive(Debug, Default, Deserialize)]
pub struct LoggingFileConfig {
    pub level: Option<String>,
    pub file: Option<String>,
}

/// A `[skills.<name>]` table
///
/// `enabled` is the only reserved key; everything else is handed to the skill.
#[derive(Debug, Default, Deserialize)]
pub struct SkillFileConfig {
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub params: BTreeMap<String, toml::Value>,
}

/// Load the TOML config file from the standard path
///
/// Returns `AssistantConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> AssistantConfigFile {
    let Some(path) = config_file_path() else {
        return AssistantConfigFile::default();
    };

    if !path.exists() {
        return AssistantConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            AssistantConfigFile::default()
        }
    }
}

/// Load a config file the user named explicitly
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_config_file_from(path: &Path) -> Result<AssistantConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/voice-assistant/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("voice-assistant")
            .join("config.toml")
    })
}
