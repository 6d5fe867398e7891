//! Configuration management for the Apex voice client
//!
//! Values resolve as env > toml > default. CLI flags are applied on top by the
//! binary.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::voice::{DesignatedVoice, Voice, VoicePolicy};
use crate::{Error, Result};

use file::ApexConfigFile;

/// Default voice stream endpoint of the assistant service
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws/voice-stream";

/// Largest accepted sensor analysis window
pub const MAX_FFT_SIZE: usize = 2048;

/// Apex voice client configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Assistant service connection
    pub server: ServerConfig,

    /// Turn-taking behaviour
    pub session: SessionConfig,

    /// Speech capture and endpointing
    pub capture: CaptureConfig,

    /// Speech-to-text backend
    pub stt: SttConfig,

    /// Text-to-speech backend
    pub tts: TtsConfig,

    /// Speech output and voice selection
    pub output: OutputConfig,

    /// Audio level sensor
    pub sensor: SensorConfig,

    /// Conversation history store
    pub history: HistoryConfig,
}

/// Assistant service connection
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket URL of the voice stream endpoint
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

/// Turn-taking configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay before capture restarts after it ends or playback finishes
    pub restart_delay: Duration,

    /// Recognition language tag
    pub capture_language: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(50),
            capture_language: "en-IN".to_string(),
        }
    }
}

/// Capture/endpointing configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f32,

    /// Minimum speech before an utterance can complete
    pub min_speech: Duration,

    /// Trailing silence that ends an utterance
    pub end_silence: Duration,

    /// Give up when no speech starts within this window
    pub no_speech_timeout: Duration,

    /// Force completion of very long utterances
    pub max_utterance: Duration,

    /// Cadence of interim transcripts while speaking, `None` disables them
    pub interim_interval: Option<Duration>,

    /// How often the microphone buffer is drained
    pub poll_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            min_speech: Duration::from_millis(300),
            end_silence: Duration::from_millis(800),
            no_speech_timeout: Duration::from_secs(8),
            max_utterance: Duration::from_secs(30),
            interim_interval: Some(Duration::from_millis(1500)),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Speech-to-text provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttBackend {
    #[default]
    Whisper,
    Deepgram,
}

impl SttBackend {
    /// Parse a provider name
    ///
    /// # Errors
    ///
    /// Returns error for unknown providers
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub backend: SttBackend,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: SttBackend::Whisper,
            model: "whisper-1".to_string(),
            api_key: None,
        }
    }
}

/// Text-to-speech provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsBackend {
    #[default]
    OpenAi,
    ElevenLabs,
}

impl TtsBackend {
    /// Parse a provider name
    ///
    /// # Errors
    ///
    /// Returns error for unknown providers
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub backend: TtsBackend,
    pub model: String,
    pub speed: f32,
    pub api_key: Option<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::OpenAi,
            model: "tts-1".to_string(),
            speed: 1.0,
            api_key: None,
        }
    }
}

/// Speech output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Retry cadence while the voice list is still empty
    pub voice_poll_interval: Duration,

    /// Give up after this many empty polls
    pub voice_poll_attempts: u32,

    /// Delay between `speak` and the first voice lookup
    pub start_delay: Duration,

    /// Voices offered by the synthesis provider
    pub voices: Vec<Voice>,

    /// Per-language designated voices (selection step 1)
    pub designated: Vec<DesignatedVoice>,

    /// Accepted language-region tags (selection steps 2 and 3)
    pub accepted_languages: Vec<String>,

    /// Base language family (selection step 4)
    pub base_family: String,

    /// Name fragments of reasonable family defaults (selection step 4)
    pub default_hints: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        // Google's hi-IN voice handles mixed English/Hindi replies best, so it
        // is designated for both labels.
        let designated = ["HI", "EN"]
            .iter()
            .map(|label| DesignatedVoice {
                language: (*label).to_string(),
                lang: "hi-IN".to_string(),
                name_contains: "Google".to_string(),
            })
            .collect();

        Self {
            voice_poll_interval: Duration::from_millis(200),
            voice_poll_attempts: 25,
            start_delay: Duration::from_millis(50),
            voices: ["alloy", "nova", "shimmer", "echo", "fable", "onyx"]
                .iter()
                .map(|name| Voice::new(*name, "en-US"))
                .collect(),
            designated,
            accepted_languages: vec!["en-IN".to_string(), "hi-IN".to_string()],
            base_family: "en".to_string(),
            default_hints: vec![
                "Female".to_string(),
                "Samantha".to_string(),
                "Google US".to_string(),
            ],
        }
    }
}

impl OutputConfig {
    /// Build the voice fallback chain described by this configuration
    #[must_use]
    pub fn voice_policy(&self) -> VoicePolicy {
        VoicePolicy::standard(
            self.designated.clone(),
            self.accepted_languages.clone(),
            self.base_family.clone(),
            self.default_hints.clone(),
        )
    }
}

/// Level sensor configuration
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Sampling cadence (display refresh)
    pub frame_interval: Duration,

    /// Analysis window; yields `fft_size / 2` frequency bins
    pub fft_size: usize,

    /// Mean bin magnitude that maps to a level of 1.0
    pub reference: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            fft_size: 256,
            reference: 128.0,
        }
    }
}

/// History store configuration
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// JSON file holding all conversations
    pub path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

/// Return the default history file: `~/.local/share/apex/conversations.json` on Linux
pub fn default_history_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".apex/conversations.json"),
        |d| d.data_dir().join("apex").join("conversations.json"),
    )
}

fn millis(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_millis)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from the standard file location and environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Load configuration from an explicit file and the environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a value is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_file(file::load_config_from(path)?)
    }

    /// Resolve a parsed config file against environment and defaults
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn from_file(fc: ApexConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let server = ServerConfig {
            url: env_var("APEX_SERVER_URL")
                .or(fc.server.url)
                .unwrap_or(defaults.server.url),
        };

        let session = SessionConfig {
            restart_delay: millis(fc.session.restart_delay_ms, defaults.session.restart_delay),
            capture_language: fc
                .session
                .capture_language
                .unwrap_or(defaults.session.capture_language),
        };

        let dc = defaults.capture;
        let capture = CaptureConfig {
            energy_threshold: fc.capture.energy_threshold.unwrap_or(dc.energy_threshold),
            min_speech: millis(fc.capture.min_speech_ms, dc.min_speech),
            end_silence: millis(fc.capture.end_silence_ms, dc.end_silence),
            no_speech_timeout: millis(fc.capture.no_speech_timeout_ms, dc.no_speech_timeout),
            max_utterance: millis(fc.capture.max_utterance_ms, dc.max_utterance),
            interim_interval: match fc.capture.interim_interval_ms {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => dc.interim_interval,
            },
            poll_interval: millis(fc.capture.poll_interval_ms, dc.poll_interval),
        };

        let stt_backend = fc
            .stt
            .provider
            .as_deref()
            .map(SttBackend::parse)
            .transpose()?
            .unwrap_or_default();
        let stt_key = match stt_backend {
            SttBackend::Whisper => env_var("OPENAI_API_KEY"),
            SttBackend::Deepgram => env_var("DEEPGRAM_API_KEY"),
        };
        let stt = SttConfig {
            backend: stt_backend,
            model: env_var("APEX_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| match stt_backend {
                    SttBackend::Whisper => defaults.stt.model.clone(),
                    SttBackend::Deepgram => "nova-2".to_string(),
                }),
            api_key: stt_key.or(fc.stt.api_key),
        };

        let tts_backend = fc
            .tts
            .provider
            .as_deref()
            .map(TtsBackend::parse)
            .transpose()?
            .unwrap_or_default();
        let tts_key = match tts_backend {
            TtsBackend::OpenAi => env_var("OPENAI_API_KEY"),
            TtsBackend::ElevenLabs => env_var("ELEVENLABS_API_KEY"),
        };
        let speed = fc.tts.speed.unwrap_or(defaults.tts.speed);
        if !(0.25..=4.0).contains(&speed) {
            return Err(Error::Config(format!(
                "tts.speed must be between 0.25 and 4.0, got {speed}"
            )));
        }
        let tts = TtsConfig {
            backend: tts_backend,
            model: env_var("APEX_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| match tts_backend {
                    TtsBackend::OpenAi => defaults.tts.model.clone(),
                    TtsBackend::ElevenLabs => "eleven_multilingual_v2".to_string(),
                }),
            speed,
            api_key: tts_key.or(fc.tts.api_key),
        };

        let doc = defaults.output;
        let output = OutputConfig {
            voice_poll_interval: millis(fc.output.voice_poll_interval_ms, doc.voice_poll_interval),
            voice_poll_attempts: fc.output.voice_poll_attempts.unwrap_or(doc.voice_poll_attempts),
            start_delay: millis(fc.output.start_delay_ms, doc.start_delay),
            voices: fc.output.voices.unwrap_or(doc.voices),
            designated: fc.output.designated.unwrap_or(doc.designated),
            accepted_languages: fc.output.accepted_languages.unwrap_or(doc.accepted_languages),
            base_family: fc.output.base_family.unwrap_or(doc.base_family),
            default_hints: fc.output.default_hints.unwrap_or(doc.default_hints),
        };

        let ds = defaults.sensor;
        let fft_size = fc.sensor.fft_size.unwrap_or(ds.fft_size);
        if !(32..=MAX_FFT_SIZE).contains(&fft_size) || !fft_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "sensor.fft_size must be a power of two between 32 and {MAX_FFT_SIZE}, got {fft_size}"
            )));
        }
        let sensor = SensorConfig {
            frame_interval: millis(fc.sensor.frame_interval_ms, ds.frame_interval),
            fft_size,
            reference: fc.sensor.reference.unwrap_or(ds.reference),
        };

        let history = HistoryConfig {
            path: env_var("APEX_HISTORY_PATH")
                .map(PathBuf::from)
                .or(fc.history.path)
                .unwrap_or(defaults.history.path),
        };

        Ok(Self {
            server,
            session,
            capture,
            stt,
            tts,
            output,
            sensor,
            history,
        })
    }
}
