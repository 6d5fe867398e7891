//! Wire types for the voice stream
//!
//! Every message is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Message sent to the assistant service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Sent once, immediately after the connection opens
    Start,
    /// A finalized user utterance
    TextInput { text: String },
}

/// Message received from the assistant service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Assistant reply to speak
    Transcript {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// Server-side progress label (e.g. "thinking", "speaking")
    Status { status: String },
    /// Informational message
    Info { message: String },
    /// Server-side failure for the current turn
    Error { message: String },
    /// Any `type` this client does not know
    #[serde(other)]
    Unknown,
}

/// Status label acted upon by the session
pub const STATUS_THINKING: &str = "thinking";

impl ClientEvent {
    /// Encode as a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEvent {
    /// Decode a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for payloads that are not a tagged object
    /// or whose known variant is missing required fields
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("{e}: {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_encode_with_type_tag() {
        assert_eq!(ClientEvent::Start.to_json().unwrap(), r#"{"type":"start"}"#);
        assert_eq!(
            ClientEvent::TextInput {
                text: "hello".to_string()
            }
            .to_json()
            .unwrap(),
            r#"{"type":"text_input","text":"hello"}"#
        );
    }

    #[test]
    fn transcript_with_labels() {
        let event = ServerEvent::parse(
            r#"{"type":"transcript","text":"Hi there!","emotion":"Happy","language":"EN"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::Transcript {
                text: "Hi there!".to_string(),
                emotion: Some("Happy".to_string()),
                language: Some("EN".to_string()),
            }
        );
    }

    #[test]
    fn transcript_labels_are_optional() {
        let event = ServerEvent::parse(r#"{"type":"transcript","text":"ok"}"#).unwrap();
        assert_eq!(
            event,
            ServerEvent::Transcript {
                text: "ok".to_string(),
                emotion: None,
                language: None,
            }
        );
    }

    #[test]
    fn status_and_info() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"status","status":"thinking"}"#).unwrap(),
            ServerEvent::Status {
                status: STATUS_THINKING.to_string()
            }
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"info","message":"Connected to Apex Voice"}"#).unwrap(),
            ServerEvent::Info {
                message: "Connected to Apex Voice".to_string()
            }
        );
    }

    #[test]
    fn unknown_types_are_tolerated() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"audio","data":"AAAA"}"#).unwrap(),
            ServerEvent::Unknown
        );
    }

    #[test]
    fn malformed_payloads_are_protocol_errors() {
        assert!(matches!(
            ServerEvent::parse("not json"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"transcript"}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"text":"no tag"}"#),
            Err(Error::Protocol(_))
        ));
    }
}
