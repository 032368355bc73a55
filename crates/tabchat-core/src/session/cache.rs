//! Per-session message cache.
//!
//! One message list and one loading flag per session, plus a displayed view
//! that always mirrors the active session. Mutations to the active session
//! are published synchronously on a `watch` channel; mutations to background
//! sessions are recorded without touching the displayed view.

use std::collections::{HashMap, HashSet};

use tokio::sync::watch;
use tracing::trace;

use super::types::SessionId;
use crate::app::message::ChatMessage;

/// What the chat surface is currently showing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayedView {
    pub session_id: Option<SessionId>,
    pub messages: Vec<ChatMessage>,
    pub loading: bool,
}

/// Result of switching the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The cache already held messages and they are displayed.
    Cached,
    /// Nothing cached; the caller should hydrate from persistence.
    NeedsHydration,
    /// No session is active.
    Cleared,
}

#[derive(Debug)]
pub struct MessageCache {
    messages: HashMap<SessionId, Vec<ChatMessage>>,
    loading: HashSet<SessionId>,
    hydrating: HashSet<SessionId>,
    active: Option<SessionId>,
    displayed: watch::Sender<DisplayedView>,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCache {
    pub fn new() -> Self {
        let (displayed, _) = watch::channel(DisplayedView::default());
        Self {
            messages: HashMap::new(),
            loading: HashSet::new(),
            hydrating: HashSet::new(),
            active: None,
            displayed,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayedView> {
        self.displayed.subscribe()
    }

    pub fn displayed(&self) -> DisplayedView {
        self.displayed.borrow().clone()
    }

    pub fn active(&self) -> Option<SessionId> {
        self.active
    }

    pub fn messages(&self, session_id: SessionId) -> Vec<ChatMessage> {
        self.messages.get(&session_id).cloned().unwrap_or_default()
    }

    pub fn message_count(&self, session_id: SessionId) -> usize {
        self.messages.get(&session_id).map_or(0, Vec::len)
    }

    pub fn is_loading(&self, session_id: SessionId) -> bool {
        self.loading.contains(&session_id)
    }

    /// True between `set_active` reporting `NeedsHydration` and the matching
    /// `apply_hydration`.
    pub fn is_hydrating(&self, session_id: SessionId) -> bool {
        self.hydrating.contains(&session_id)
    }

    /// Applies `updater` to the session's list.
    pub fn update_messages<F>(&mut self, session_id: SessionId, updater: F)
    where
        F: FnOnce(&mut Vec<ChatMessage>),
    {
        updater(self.messages.entry(session_id).or_default());
        self.publish_if_active(session_id);
    }

    pub fn set_loading(&mut self, session_id: SessionId, loading: bool) {
        let changed = if loading {
            self.loading.insert(session_id)
        } else {
            self.loading.remove(&session_id)
        };
        if changed {
            self.publish_if_active(session_id);
        }
    }

    /// Points the displayed view at `session_id`.
    pub fn set_active(&mut self, session_id: Option<SessionId>) -> Activation {
        self.active = session_id;
        let Some(session_id) = session_id else {
            self.publish();
            return Activation::Cleared;
        };

        if self.message_count(session_id) > 0 {
            self.publish();
            Activation::Cached
        } else {
            self.loading.insert(session_id);
            self.hydrating.insert(session_id);
            self.publish();
            Activation::NeedsHydration
        }
    }

    /// Installs history loaded from persistence. A list that gained messages
    /// while the load was in flight is kept as is. When `stream_in_flight` is
    /// false the loading flag is cleared.
    pub fn apply_hydration(
        &mut self,
        session_id: SessionId,
        loaded: Vec<ChatMessage>,
        stream_in_flight: bool,
    ) {
        self.hydrating.remove(&session_id);
        let list = self.messages.entry(session_id).or_default();
        if list.is_empty() {
            *list = loaded;
        } else {
            trace!(session_id = %session_id, "Keeping messages added during hydration");
        }
        if !stream_in_flight {
            self.loading.remove(&session_id);
        }
        self.publish_if_active(session_id);
    }

    /// Empties one session's list and clears its loading flag.
    pub fn clear(&mut self, session_id: SessionId) {
        if let Some(list) = self.messages.get_mut(&session_id) {
            list.clear();
        }
        self.loading.remove(&session_id);
        self.publish_if_active(session_id);
    }

    /// Drops everything cached for a deleted session.
    pub fn remove(&mut self, session_id: SessionId) {
        self.messages.remove(&session_id);
        self.loading.remove(&session_id);
        self.hydrating.remove(&session_id);
        if self.active == Some(session_id) {
            self.active = None;
            self.publish();
        }
    }

    fn publish_if_active(&self, session_id: SessionId) {
        if self.active == Some(session_id) {
            self.publish();
        }
    }

    fn publish(&self) {
        let view = match self.active {
            Some(session_id) => DisplayedView {
                session_id: Some(session_id),
                messages: self.messages(session_id),
                loading: self.is_loading(session_id),
            },
            None => DisplayedView::default(),
        };
        self.displayed.send_replace(view);
    }
}
