//! Apex Voice - spoken conversations with the Apex assistant
//!
//! This library provides the voice client around a turn-taking state machine:
//! - Speech capture (microphone, endpointing, STT)
//! - Speech output (voice selection, TTS, playback)
//! - A duplex WebSocket channel to the assistant service
//! - A level sensor for visual feedback
//! - Conversation history shared with the text chat
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Presentation                       │
//! │        snapshots (watch)  │  notices  │  commands    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Turn-taking machine                    │
//! │   idle → listening → thinking → speaking → listening │
//! └──┬──────────┬──────────┬──────────┬──────────┬──────┘
//!    │          │          │          │          │
//!  Capture   Output    Channel     Sensor    History
//!  (STT)     (TTS)     (WebSocket) (level)   (JSON)
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod history;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Notice, Session, SessionHandle, SessionSnapshot, Status};
