//! Error types for the Apex voice client

use thiserror::Error;

/// Result type alias for Apex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Apex voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone could not be acquired
    #[error("microphone unavailable: {0}")]
    Microphone(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Speech-to-text service refused the request (bad or missing credentials)
    #[error("STT service not allowed: {0}")]
    SttNotAllowed(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Duplex channel error
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed or unexpected wire payload
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Conversation history error
    #[error("history error: {0}")]
    History(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
