//! Conversation history shared with the text chat
//!
//! Conversations are kept most-recently-updated first. The voice session only
//! appends utterances; it never deletes or reorders beyond moving the active
//! conversation to the front.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Longest title taken verbatim from the first utterance
const TITLE_CHARS: usize = 30;

/// Who spoke an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: Role,
    pub content: String,

    /// Routing hint recorded by the text chat; never written by voice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Utterance>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Capability: append-only access to the shared conversation list
pub trait HistoryStore {
    /// Append an utterance, creating the conversation when absent
    ///
    /// The conversation moves to the front of the recency ordering.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or written
    fn append_utterance(&mut self, conversation_id: &str, role: Role, text: &str) -> Result<()>;

    /// The conversation to continue: `requested` if given, else the most
    /// recently updated one, else `None`
    fn resolve_active_conversation_id(&self, requested: Option<&str>) -> Option<String>;
}

/// Derive a title from the first utterance of a conversation
#[must_use]
pub fn derive_title(text: &str) -> String {
    if text.chars().count() > TITLE_CHARS {
        let head: String = text.chars().take(TITLE_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Generate an id for a new conversation
#[must_use]
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// History kept in a single JSON file
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    /// Open a store at `path`; the file is created on first write
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All conversations, most recent first
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn conversations(&self) -> Result<Vec<Conversation>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::History(format!("{} is not a conversation list: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, conversations: &[Conversation]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(conversations)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append_utterance(&mut self, conversation_id: &str, role: Role, text: &str) -> Result<()> {
        let mut conversations = self.conversations()?;
        let utterance = Utterance {
            role,
            content: text.to_string(),
            intent: None,
        };

        let conversation = match conversations.iter().position(|c| c.id == conversation_id) {
            Some(index) => {
                let mut existing = conversations.remove(index);
                existing.messages.push(utterance);
                existing.updated_at = Utc::now();
                existing
            }
            None => {
                tracing::debug!(conversation_id, "creating conversation");
                Conversation {
                    id: conversation_id.to_string(),
                    title: derive_title(text),
                    messages: vec![utterance],
                    updated_at: Utc::now(),
                }
            }
        };
        conversations.insert(0, conversation);

        self.save(&conversations)?;
        tracing::debug!(conversation_id, %role, "utterance saved");
        Ok(())
    }

    fn resolve_active_conversation_id(&self, requested: Option<&str>) -> Option<String> {
        if let Some(id) = requested {
            return Some(id.to_string());
        }
        match self.conversations() {
            Ok(conversations) => conversations.first().map(|c| c.id.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "could not read history");
                None
            }
        }
    }
}
