//! Session and tab registry.
//!
//! Holds the durable facts about sessions and the tabs that point at them,
//! together with the active-session/active-tab selection. All operations are
//! synchronous list manipulations; persistence is the caller's concern.
//!
//! Invariants maintained by every operation:
//! - at most one active session and one active tab;
//! - when a tab is active, its `session_id` is the active session;
//! - every tab references a session in the registry.

use std::collections::HashMap;

use tracing::debug;

use super::types::{ChatSession, ChatTab, SessionId, TabId, View};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<ChatSession>,
    tabs: Vec<ChatTab>,
    active_session_id: Option<SessionId>,
    active_tab_id: Option<TabId>,
    view: View,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn tabs(&self) -> &[ChatTab] {
        &self.tabs
    }

    pub fn session(&self, session_id: SessionId) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.session(session_id).is_some()
    }

    pub fn tab(&self, tab_id: TabId) -> Option<&ChatTab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active_session_id
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.active_tab_id
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        self.active_session_id.and_then(|id| self.session(id))
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
    }

    /// Creates a session with a fresh id, prepends it, opens a tab for it and
    /// makes both active. Without a title the session is named `Chat {n+1}`.
    pub fn create_session(
        &mut self,
        title: Option<String>,
        working_directory: Option<String>,
    ) -> SessionId {
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Chat {}", self.sessions.len() + 1));
        let mut session = ChatSession::new(SessionId::new(), title);
        session.working_directory = working_directory;

        let session_id = session.id;
        let tab = ChatTab::for_session(&session);
        let tab_id = tab.id;

        self.sessions.insert(0, session);
        self.tabs.push(tab);
        self.active_session_id = Some(session_id);
        self.active_tab_id = Some(tab_id);
        self.view = View::Chat;

        debug!(session_id = %session_id, tab_id = %tab_id, "Created session");
        session_id
    }

    pub fn set_pending(&mut self, session_id: SessionId, pending: bool) {
        if let Some(session) = self.session_mut(session_id) {
            session.pending = pending;
        }
    }

    /// Removes the session and every tab bound to it. Returns false if the
    /// session was unknown.
    pub fn delete_session(&mut self, session_id: SessionId) -> bool {
        let Some(index) = self.sessions.iter().position(|s| s.id == session_id) else {
            return false;
        };
        self.sessions.remove(index);

        while let Some(tab_index) = self.tabs.iter().position(|t| t.session_id == session_id) {
            self.remove_tab_at(tab_index);
        }

        if self.active_session_id == Some(session_id) {
            self.active_session_id = None;
            self.active_tab_id = None;
        }

        debug!(session_id = %session_id, "Deleted session");
        true
    }

    /// Updates the session title and mirrors it onto its tabs.
    pub fn rename_session(&mut self, session_id: SessionId, title: impl Into<String>) -> bool {
        let title = title.into();
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        session.title.clone_from(&title);
        session.touch();

        for tab in self.tabs.iter_mut().filter(|t| t.session_id == session_id) {
            tab.title.clone_from(&title);
        }
        true
    }

    /// Records streaming activity on a session: optional new preview and a
    /// message count increment.
    pub fn record_activity(
        &mut self,
        session_id: SessionId,
        preview: Option<String>,
        message_delta: u32,
    ) {
        if let Some(session) = self.session_mut(session_id) {
            if preview.is_some() {
                session.preview = preview;
            }
            session.message_count = session.message_count.saturating_add(message_delta);
            session.touch();
        }
    }

    /// Activates the tab bound to `session_id`, creating one if none exists.
    pub fn open_tab(&mut self, session_id: SessionId) -> Option<TabId> {
        let session = self.session(session_id)?;

        let tab_id = match self.tabs.iter().find(|t| t.session_id == session_id) {
            Some(tab) => tab.id,
            None => {
                let tab = ChatTab::for_session(session);
                let tab_id = tab.id;
                self.tabs.push(tab);
                tab_id
            }
        };

        self.active_tab_id = Some(tab_id);
        self.active_session_id = Some(session_id);
        self.view = View::Chat;
        Some(tab_id)
    }

    /// Makes `tab_id` the active tab and returns its session.
    pub fn activate_tab(&mut self, tab_id: TabId) -> Option<SessionId> {
        let session_id = self.tab(tab_id)?.session_id;
        self.active_tab_id = Some(tab_id);
        self.active_session_id = Some(session_id);
        Some(session_id)
    }

    /// Closes a tab. Pinned or unknown tabs are left alone and false is
    /// returned.
    pub fn close_tab(&mut self, tab_id: TabId) -> bool {
        let Some(index) = self.tabs.iter().position(|t| t.id == tab_id) else {
            return false;
        };
        if self.tabs[index].is_pinned {
            return false;
        }
        self.remove_tab_at(index);
        true
    }

    pub fn set_pinned(&mut self, tab_id: TabId, pinned: bool) -> bool {
        match self.tabs.iter_mut().find(|t| t.id == tab_id) {
            Some(tab) => {
                tab.is_pinned = pinned;
                true
            }
            None => false,
        }
    }

    /// Moves the tab at `from` to position `to` (clamped to the list).
    pub fn move_tab(&mut self, from: usize, to: usize) -> bool {
        if from >= self.tabs.len() {
            return false;
        }
        let tab = self.tabs.remove(from);
        let to = to.min(self.tabs.len());
        self.tabs.insert(to, tab);
        true
    }

    /// Merges freshly loaded sessions with the ones already known. Entries
    /// are deduplicated by id, with loaded data replacing local data, and
    /// the list is re-sorted by most recently updated.
    pub fn merge_sessions(&mut self, loaded: Vec<ChatSession>) {
        let mut by_id: HashMap<SessionId, ChatSession> = self
            .sessions
            .drain(..)
            .map(|session| (session.id, session))
            .collect();
        for session in loaded {
            by_id.insert(session.id, session);
        }

        let mut merged: Vec<ChatSession> = by_id.into_values().collect();
        merged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        self.sessions = merged;

        for tab in &mut self.tabs {
            if let Some(session) = self.sessions.iter().find(|s| s.id == tab.session_id) {
                tab.title.clone_from(&session.title);
            }
        }
    }

    fn session_mut(&mut self, session_id: SessionId) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == session_id)
    }

    /// Removes the tab at `index`. If it was active, the tab now occupying
    /// `min(index, len - 1)` becomes active, or activity is cleared when no
    /// tabs remain.
    fn remove_tab_at(&mut self, index: usize) {
        let removed = self.tabs.remove(index);
        if self.active_tab_id != Some(removed.id) {
            return;
        }

        if self.tabs.is_empty() {
            self.active_tab_id = None;
            self.active_session_id = None;
            return;
        }

        let next = &self.tabs[index.min(self.tabs.len() - 1)];
        self.active_tab_id = Some(next.id);
        self.active_session_id = Some(next.session_id);
    }
}
