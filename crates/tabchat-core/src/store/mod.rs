//! Persistence collaborators: backend session storage and the prompt history
//! log. The core only consumes these traits; the implementations here cover
//! an HTTP backend, a local file and in-memory use.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::message::{ChatMessage, MessageId, Role, ToolInteraction};
use crate::session::{ChatSession, SessionId};

pub mod http;
pub mod memory;
pub mod prompt_history;

pub use http::HttpSessionStore;
pub use memory::InMemorySessionStore;
pub use prompt_history::{FilePromptHistory, InMemoryPromptHistory};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Backend error (Status: {status_code}): {details}")]
    Status { status_code: u16, details: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("In-memory store lock poisoned: {message}")]
    LockPoisoned { message: String },
}

impl StoreError {
    pub fn not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound {
            session_id: session_id.to_string(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn lock_poisoned(message: impl Into<String>) -> Self {
        Self::LockPoisoned {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToolInteraction {
    pub message_id: String,
    #[serde(flatten)]
    pub interaction: ToolInteraction,
}

/// Durable history of one session as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub tool_interactions: Vec<StoredToolInteraction>,
}

impl SessionDetail {
    /// Rebuilds cache messages, attaching tool interactions to the message
    /// they were recorded on.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        let mut tools: HashMap<String, Vec<ToolInteraction>> = HashMap::new();
        for stored in self.tool_interactions {
            tools
                .entry(stored.message_id)
                .or_default()
                .push(stored.interaction);
        }

        self.messages
            .into_iter()
            .map(|stored| {
                let mut message = ChatMessage::new(stored.role, stored.content);
                message.tool_interactions = tools.remove(&stored.id).unwrap_or_default();
                message.id = MessageId::from(stored.id);
                message.model = stored.model;
                message.timestamp = stored.created_at;
                message
            })
            .collect()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, StoreError>;

    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError>;

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError>;

    async fn get_session_detail(&self, session_id: SessionId) -> Result<SessionDetail, StoreError>;

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: &str,
        model: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn rename_session(&self, session_id: SessionId, title: &str) -> Result<(), StoreError>;

    /// Asks the backend to derive a better title. Best effort.
    async fn generate_title(&self, session_id: SessionId) -> Result<(), StoreError>;
}

/// Append-only log of submitted prompts, used for recall.
#[async_trait]
pub trait PromptHistory: Send + Sync {
    async fn add_prompt(&self, text: &str) -> Result<(), StoreError>;
}
