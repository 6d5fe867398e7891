//! Text-to-speech (TTS) synthesis engines

use std::io::Cursor;

use async_trait::async_trait;

use crate::config::{TtsBackend, TtsConfig};
use crate::{Error, Result};

use super::voices::Voice;

/// Capability: list voices and render text to audio samples
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Voices currently offered; may be empty while the provider warms up
    ///
    /// # Errors
    ///
    /// Returns error if the voice list cannot be fetched
    async fn voices(&self) -> Result<Vec<Voice>>;

    /// Render `text` with `voice` to mono f32 samples at [`SpeechEngine::sample_rate`]
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or decoding fails
    async fn synthesize(&self, text: &str, voice: &Voice) -> Result<Vec<f32>>;

    /// Sample rate of synthesized audio
    fn sample_rate(&self) -> u32 {
        SYNTH_SAMPLE_RATE
    }
}

/// Sample rate of provider MP3 output
pub const SYNTH_SAMPLE_RATE: u32 = 24000;

/// Synthesizes speech over HTTP
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    speed: f32,
    model: String,
    backend: TtsBackend,
    voices: Vec<Voice>,
}

impl TextToSpeech {
    /// Create a TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, model: String, speed: f32, voices: Vec<Voice>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            speed,
            model,
            backend: TtsBackend::OpenAi,
            voices,
        })
    }

    /// Create a TTS instance using ElevenLabs
    ///
    /// Voice ids are taken from [`Voice::provider_id`].
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, model: String, voices: Vec<Voice>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            speed: 1.0,
            model,
            backend: TtsBackend::ElevenLabs,
            voices,
        })
    }

    /// Create a TTS instance from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the selected provider has no API key
    pub fn from_config(config: &TtsConfig, voices: Vec<Voice>) -> Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        match config.backend {
            TtsBackend::OpenAi => {
                Self::new_openai(api_key, config.model.clone(), config.speed, voices)
            }
            TtsBackend::ElevenLabs => Self::new_elevenlabs(api_key, config.model.clone(), voices),
        }
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice_id}");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechEngine for TextToSpeech {
    async fn voices(&self) -> Result<Vec<Voice>> {
        Ok(self.voices.clone())
    }

    async fn synthesize(&self, text: &str, voice: &Voice) -> Result<Vec<f32>> {
        tracing::debug!(voice = %voice.name, chars = text.len(), "synthesizing");
        let mp3 = match self.backend {
            TtsBackend::OpenAi => self.synthesize_openai(text, voice.provider_id()).await?,
            TtsBackend::ElevenLabs => {
                self.synthesize_elevenlabs(text, voice.provider_id()).await?
            }
        };
        decode_mp3(&mp3)
    }
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the stream is corrupt
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_rejected() {
        let config = TtsConfig::default();
        assert!(matches!(
            TextToSpeech::from_config(&config, Vec::new()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn voices_come_from_configuration() {
        let voices = vec![Voice::new("nova", "en-US"), Voice::new("Google हिन्दी", "hi-IN")];
        let tts = TextToSpeech::new_openai(
            "sk-test".to_string(),
            "tts-1".to_string(),
            1.0,
            voices.clone(),
        )
        .unwrap();
        assert_eq!(tts.voices().await.unwrap(), voices);
        assert_eq!(tts.sample_rate(), SYNTH_SAMPLE_RATE);
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(decode_mp3(&[]).unwrap().is_empty());
    }
}
