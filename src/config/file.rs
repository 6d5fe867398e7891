//! TOML configuration file loading
//!
//! Supports `~/.config/apex/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::voice::{DesignatedVoice, Voice};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ApexConfigFile {
    /// Assistant service connection
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Turn-taking behaviour
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Speech capture and endpointing
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speech-to-text backend
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech backend
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Speech output and voice selection
    #[serde(default)]
    pub output: OutputFileConfig,

    /// Audio level sensor
    #[serde(default)]
    pub sensor: SensorFileConfig,

    /// Conversation history store
    #[serde(default)]
    pub history: HistoryFileConfig,
}

/// Assistant service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// WebSocket URL of the voice stream endpoint
    pub url: Option<String>,
}

/// Turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub restart_delay_ms: Option<u64>,
    pub capture_language: Option<String>,
}

/// Capture/endpointing configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub energy_threshold: Option<f32>,
    pub min_speech_ms: Option<u64>,
    pub end_silence_ms: Option<u64>,
    pub no_speech_timeout_ms: Option<u64>,
    pub max_utterance_ms: Option<u64>,
    /// `0` disables interim results
    pub interim_interval_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "elevenlabs"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub speed: Option<f32>,
    pub api_key: Option<String>,
}

/// Speech output configuration
#[derive(Debug, Default, Deserialize)]
pub struct OutputFileConfig {
    pub voice_poll_interval_ms: Option<u64>,
    pub voice_poll_attempts: Option<u32>,
    pub start_delay_ms: Option<u64>,
    pub voices: Option<Vec<Voice>>,
    pub designated: Option<Vec<DesignatedVoice>>,
    pub accepted_languages: Option<Vec<String>>,
    pub base_family: Option<String>,
    pub default_hints: Option<Vec<String>>,
}

/// Level sensor configuration
#[derive(Debug, Default, Deserialize)]
pub struct SensorFileConfig {
    pub frame_interval_ms: Option<u64>,
    pub fft_size: Option<usize>,
    pub reference: Option<f32>,
}

/// History store configuration
#[derive(Debug, Default, Deserialize)]
pub struct HistoryFileConfig {
    pub path: Option<PathBuf>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ApexConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ApexConfigFile {
    let Some(path) = config_file_path() else {
        return ApexConfigFile::default();
    };

    if !path.exists() {
        return ApexConfigFile::default();
    }

    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ApexConfigFile::default()
        }
    }
}

/// Load a TOML config file from an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_from(path: &Path) -> Result<ApexConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/apex/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("apex").join("config.toml"))
}
