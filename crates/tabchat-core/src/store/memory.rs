use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{SessionDetail, SessionStore, StoreError, StoredMessage};
use crate::app::message::Role;
use crate::session::{ChatSession, SessionId};

const GENERATED_TITLE_WORDS: usize = 6;

struct Entry {
    session: ChatSession,
    messages: Vec<StoredMessage>,
}

/// Session storage kept in process memory.
///
/// Sessions unknown to the store are created implicitly on first append, so
/// locally created sessions work even if `create_session` was never called.
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<SessionId, Entry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds a session with history, replacing any existing entry.
    pub fn insert(&self, session: ChatSession, messages: Vec<StoredMessage>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(session.id, Entry { session, messages });
        }
    }

    pub fn messages(&self, session_id: SessionId) -> Vec<StoredMessage> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&session_id).map(|e| e.messages.clone()))
            .unwrap_or_default()
    }

    pub fn session(&self, session_id: SessionId) -> Option<ChatSession> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&session_id).map(|e| e.session.clone()))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn title_from(content: &str) -> Option<String> {
    let title: Vec<&str> = content.split_whitespace().take(GENERATED_TITLE_WORDS).collect();
    if title.is_empty() {
        None
    } else {
        Some(title.join(" "))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::lock_poisoned("entries"))?;
        let mut sessions: Vec<ChatSession> = entries.values().map(|e| e.session.clone()).collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::lock_poisoned("entries"))?;
        let mut session = session.clone();
        session.pending = false;
        entries.entry(session.id).or_insert(Entry {
            session,
            messages: Vec::new(),
        });
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::lock_poisoned("entries"))?;
        entries
            .remove(&session_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(session_id))
    }

    async fn get_session_detail(&self, session_id: SessionId) -> Result<SessionDetail, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::lock_poisoned("entries"))?;
        let entry = entries
            .get(&session_id)
            .ok_or_else(|| StoreError::not_found(session_id))?;
        Ok(SessionDetail {
            messages: entry.messages.clone(),
            tool_interactions: Vec::new(),
        })
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: &str,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::lock_poisoned("entries"))?;
        let entry = entries.entry(session_id).or_insert_with(|| Entry {
            session: ChatSession::new(session_id, "Untitled"),
            messages: Vec::new(),
        });
        entry.messages.push(StoredMessage {
            id: Uuid::now_v7().to_string(),
            role,
            content: content.to_string(),
            model: model.map(str::to_string),
            created_at: Utc::now(),
        });
        entry.session.message_count = entry.messages.len() as u32;
        entry.session.touch();
        Ok(())
    }

    async fn rename_session(&self, session_id: SessionId, title: &str) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::lock_poisoned("entries"))?;
        let entry = entries
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::not_found(session_id))?;
        entry.session.title = title.to_string();
        entry.session.touch();
        Ok(())
    }

    async fn generate_title(&self, session_id: SessionId) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::lock_poisoned("entries"))?;
        let entry = entries
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::not_found(session_id))?;
        let title = entry
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| title_from(&m.content));
        if let Some(title) = title {
            entry.session.title = title;
            entry.session.touch();
        }
        Ok(())
    }
}
