//! Speech-to-text (STT) recognition backends

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::{SttBackend, SttConfig};
use crate::{Error, Result};

/// Capability: turn a WAV-encoded utterance into text
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Transcribe one utterance
    ///
    /// `language` is a BCP-47 hint such as "en-IN".
    ///
    /// # Errors
    ///
    /// Returns [`Error::SttNotAllowed`] when the service refuses the
    /// credentials, [`Error::Stt`] or [`Error::Http`] for other failures
    async fn transcribe(&self, wav: Vec<u8>, language: &str) -> Result<String>;
}

/// Whisper `transcriptions` response body
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Deepgram `listen` response body
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes speech to text over HTTP
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    backend: SttBackend,
}

impl SpeechToText {
    /// Recognizer backed by `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            backend: SttBackend::Whisper,
        })
    }

    /// Recognizer backed by Deepgram prerecorded transcription
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            backend: SttBackend::Deepgram,
        })
    }

    /// Create an STT instance from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the selected provider has no API key
    pub fn from_config(config: &SttConfig) -> Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        match config.backend {
            SttBackend::Whisper => Self::new_whisper(api_key, config.model.clone()),
            SttBackend::Deepgram => Self::new_deepgram(api_key, config.model.clone()),
        }
    }

    /// One Whisper request per utterance
    async fn transcribe_whisper(&self, audio: Vec<u8>, language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "sending utterance to Whisper");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", base_language(language).to_string());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::trace!(status = %status, "recognizer responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(classify_status("Whisper", status, &body));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "undecodable Whisper response");
            e
        })?;

        tracing::debug!(transcript = %result.text, "utterance recognized");
        Ok(result.text)
    }

    /// One Deepgram request per utterance
    async fn transcribe_deepgram(&self, audio: Vec<u8>, language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "sending utterance to Deepgram");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true&language={}",
            self.model, language
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::trace!(status = %status, "recognizer responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(classify_status("Deepgram", status, &body));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "undecodable Deepgram response");
            e
        })?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "utterance recognized");
        Ok(transcript)
    }
}

#[async_trait]
impl Recognizer for SpeechToText {
    async fn transcribe(&self, wav: Vec<u8>, language: &str) -> Result<String> {
        match self.backend {
            SttBackend::Whisper => self.transcribe_whisper(wav, language).await,
            SttBackend::Deepgram => self.transcribe_deepgram(wav, language).await,
        }
    }
}

/// Map a failed HTTP status to an error, separating credential refusals
fn classify_status(provider: &str, status: StatusCode, body: &str) -> Error {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::SttNotAllowed(format!("{provider} rejected credentials ({status})"))
    } else {
        Error::Stt(format!("{provider} API error {status}: {body}"))
    }
}

/// "en-IN" → "en"
fn base_language(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}
