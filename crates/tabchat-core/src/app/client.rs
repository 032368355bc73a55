//! Send/stream orchestration across concurrently streaming sessions.
//!
//! `ChatClient` owns the registry, the message cache and the per-session
//! cancellation handles behind one mutex. The mutex is only held for
//! synchronous updates, never across an `.await`, and every update is keyed
//! by an explicit session id so sessions can stream side by side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{
    HistoryMessage, StreamEvent, StreamRequest, Transport, TransportError, decode_event_stream,
};
use crate::app::context::{build_history, provisional_title};
use crate::app::message::{Attachment, ChatMessage, MessageId, Role, ToolInteraction};
use crate::app::streams::{StreamHandle, StreamRegistry};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::{
    Activation, ChatSession, ChatTab, DisplayedView, MessageCache, SessionId, SessionRegistry,
    TabId, View,
};
use crate::store::{PromptHistory, SessionStore, StoreError};

const PREVIEW_CHARS: usize = 100;
const ERROR_MARKER: &str = "⚠️ Error:";

/// Why a send did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoModelSelected,
    NoActiveSession,
    AlreadyStreaming,
    EmptyMessage,
    /// The session's history is still being loaded.
    Loading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Skipped(SkipReason),
    Completed {
        session_id: SessionId,
        message_id: MessageId,
    },
    Cancelled {
        session_id: SessionId,
    },
    Failed {
        session_id: SessionId,
        error: String,
    },
}

/// Everything the client tracks in memory.
#[derive(Debug, Default)]
pub struct ChatState {
    pub registry: SessionRegistry,
    pub cache: MessageCache,
    streams: StreamRegistry,
    selected_model: Option<String>,
    title_tasks: HashMap<SessionId, JoinHandle<()>>,
}

impl ChatState {
    pub fn is_streaming(&self, session_id: SessionId) -> bool {
        self.streams.is_streaming(session_id)
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    /// Puts the cache's displayed view on the registry's active session.
    fn sync_active(&mut self) -> Option<SessionId> {
        let active = self.registry.active_session_id();
        if self.cache.active() == active {
            return None;
        }
        match (self.cache.set_active(active), active) {
            (Activation::NeedsHydration, Some(session_id)) => Some(session_id),
            _ => None,
        }
    }

    /// Runs `f` on one message of a session that still exists.
    fn update_message<F>(&mut self, session_id: SessionId, message_id: &MessageId, f: F)
    where
        F: FnOnce(&mut ChatMessage),
    {
        if !self.registry.contains(session_id) {
            return;
        }
        self.cache.update_messages(session_id, |list| {
            if let Some(message) = list.iter_mut().find(|m| &m.id == message_id) {
                f(message);
            }
        });
    }

    /// Releases a stream handle and clears loading unless a newer stream
    /// took over the session.
    fn end_stream(&mut self, session_id: SessionId, handle: &StreamHandle) {
        self.streams.release(session_id, handle);
        if !self.streams.is_streaming(session_id) {
            self.cache.set_loading(session_id, false);
        }
    }
}

struct Inner {
    state: Mutex<ChatState>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    prompts: Arc<dyn PromptHistory>,
    config: ClientConfig,
}

#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        prompts: Arc<dyn PromptHistory>,
    ) -> Self {
        let state = ChatState {
            selected_model: config.default_model.clone(),
            ..ChatState::default()
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                transport,
                store,
                prompts,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Read access to the in-memory state.
    pub fn with_state<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.lock())
    }

    pub fn displayed(&self) -> DisplayedView {
        self.lock().cache.displayed()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayedView> {
        self.lock().cache.subscribe()
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.lock().registry.sessions().to_vec()
    }

    pub fn tabs(&self) -> Vec<ChatTab> {
        self.lock().registry.tabs().to_vec()
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.lock().registry.active_session_id()
    }

    pub fn messages(&self, session_id: SessionId) -> Vec<ChatMessage> {
        self.lock().cache.messages(session_id)
    }

    pub fn is_streaming(&self, session_id: SessionId) -> bool {
        self.lock().streams.is_streaming(session_id)
    }

    pub fn select_model(&self, model: impl Into<String>) {
        self.lock().selected_model = Some(model.into());
    }

    pub fn set_view(&self, view: View) {
        self.lock().registry.set_view(view);
    }

    /// Loads the backend's session list and merges it into the registry.
    pub async fn load_sessions(&self) -> Result<()> {
        let sessions = self.inner.store.list_sessions().await?;
        debug!(count = sessions.len(), "Loaded sessions");
        self.lock().registry.merge_sessions(sessions);
        Ok(())
    }

    /// Creates a session locally, activates it and registers it with the
    /// backend. The session is usable immediately; backend failure is logged
    /// and leaves it local-only.
    pub async fn create_session(
        &self,
        title: Option<String>,
        working_directory: Option<String>,
    ) -> SessionId {
        let (session_id, session) = {
            let mut state = self.lock();
            let session_id = state.registry.create_session(title, working_directory);
            state.registry.set_pending(session_id, true);
            state.cache.set_active(Some(session_id));
            state.cache.apply_hydration(session_id, Vec::new(), false);
            (session_id, state.registry.session(session_id).cloned())
        };
        let Some(session) = session else {
            return session_id;
        };

        if let Err(e) = self.inner.store.create_session(&session).await {
            warn!(session_id = %session.id, error = %e, "Failed to create session on backend");
        }
        self.lock().registry.set_pending(session.id, false);
        info!(session_id = %session.id, title = %session.title, "Session created");
        session.id
    }

    /// Opens (or reuses) the tab for a session and displays it.
    pub async fn open_session(&self, session_id: SessionId) -> Option<TabId> {
        let (tab_id, hydrate) = {
            let mut state = self.lock();
            let tab_id = state.registry.open_tab(session_id)?;
            (tab_id, state.sync_active())
        };
        if let Some(session_id) = hydrate {
            self.hydrate(session_id).await;
        }
        Some(tab_id)
    }

    pub async fn activate_tab(&self, tab_id: TabId) -> Option<SessionId> {
        let (session_id, hydrate) = {
            let mut state = self.lock();
            let session_id = state.registry.activate_tab(tab_id)?;
            (session_id, state.sync_active())
        };
        if let Some(session_id) = hydrate {
            self.hydrate(session_id).await;
        }
        Some(session_id)
    }

    /// Closes a tab. Its session keeps streaming in the background.
    pub async fn close_tab(&self, tab_id: TabId) -> bool {
        let (closed, hydrate) = {
            let mut state = self.lock();
            let closed = state.registry.close_tab(tab_id);
            (closed, state.sync_active())
        };
        if let Some(session_id) = hydrate {
            self.hydrate(session_id).await;
        }
        closed
    }

    pub fn set_tab_pinned(&self, tab_id: TabId, pinned: bool) -> bool {
        self.lock().registry.set_pinned(tab_id, pinned)
    }

    pub fn move_tab(&self, from: usize, to: usize) -> bool {
        self.lock().registry.move_tab(from, to)
    }

    pub async fn rename_session(&self, session_id: SessionId, title: &str) -> Result<()> {
        let renamed = self.lock().registry.rename_session(session_id, title);
        if !renamed {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        self.inner.store.rename_session(session_id, title).await?;
        Ok(())
    }

    /// Deletes a session: cancels its stream and pending title task, drops
    /// its cache entry and tabs, then removes it from the backend.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<()> {
        let hydrate = {
            let mut state = self.lock();
            if !state.registry.delete_session(session_id) {
                return Err(Error::NotFound(format!("session {session_id}")));
            }
            state.streams.cancel(session_id);
            if let Some(task) = state.title_tasks.remove(&session_id) {
                task.abort();
            }
            state.cache.remove(session_id);
            state.sync_active()
        };
        if let Some(next) = hydrate {
            self.hydrate(next).await;
        }

        if let Err(e) = self.inner.store.delete_session(session_id).await {
            warn!(session_id = %session_id, error = %e, "Failed to delete session on backend");
        }
        info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Empties one session's messages and cancels its stream.
    pub fn clear_session(&self, session_id: SessionId) {
        let mut state = self.lock();
        state.streams.cancel(session_id);
        state.cache.clear(session_id);
    }

    /// Stops the session's stream, if any.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        self.lock().streams.cancel(session_id)
    }

    /// Cancels every stream and pending title task.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.streams.cancel_all();
        for (_, task) in state.title_tasks.drain() {
            task.abort();
        }
    }

    async fn hydrate(&self, session_id: SessionId) {
        let messages = match self.inner.store.get_session_detail(session_id).await {
            Ok(detail) => detail.into_messages(),
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "No history loaded; starting empty");
                Vec::new()
            }
        };

        let mut state = self.lock();
        if !state.registry.contains(session_id) {
            return;
        }
        let in_flight = state.streams.is_streaming(session_id);
        state.cache.apply_hydration(session_id, messages, in_flight);
    }

    /// Sends a message to the active session and streams the reply to
    /// completion.
    pub async fn send_message(&self, text: &str, attachments: Vec<Attachment>) -> SendOutcome {
        match self.begin_send(text, attachments) {
            Ok(send) => send.run().await,
            Err(reason) => SendOutcome::Skipped(reason),
        }
    }

    /// Like [`send_message`](Self::send_message), but returns once the reply
    /// has started: the target session is captured before this returns and
    /// the stream continues on a spawned task.
    pub fn spawn_send(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> std::result::Result<JoinHandle<SendOutcome>, SkipReason> {
        let send = self.begin_send(text, attachments)?;
        Ok(tokio::spawn(send.run()))
    }

    /// Performs the synchronous half of a send: captures the target session,
    /// reserves its cancellation handle, applies the provisional title and
    /// appends the user message and assistant placeholder.
    pub fn begin_send(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> std::result::Result<PendingSend, SkipReason> {
        let config = &self.inner.config;
        let mut guard = self.lock();
        let state = &mut *guard;

        let model = state
            .selected_model
            .clone()
            .ok_or(SkipReason::NoModelSelected)?;
        let session_id = state
            .registry
            .active_session_id()
            .ok_or(SkipReason::NoActiveSession)?;
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(SkipReason::EmptyMessage);
        }
        if state.cache.is_hydrating(session_id) {
            return Err(SkipReason::Loading);
        }
        let handle = state
            .streams
            .acquire(session_id)
            .ok_or(SkipReason::AlreadyStreaming)?;

        let prior = state.cache.messages(session_id);
        let first_exchange = prior.is_empty();

        let provisional = if first_exchange {
            provisional_title(text, config.titles.provisional_max_chars)
        } else {
            None
        };
        if let Some(title) = &provisional {
            state.registry.rename_session(session_id, title.as_str());
        }

        let user_message = ChatMessage::user(text).with_attachments(attachments);
        let outgoing = user_message.outgoing_content();
        let placeholder = ChatMessage::placeholder(model.as_str());
        let placeholder_id = placeholder.id.clone();

        state.cache.update_messages(session_id, |list| {
            list.push(user_message);
            list.push(placeholder);
        });
        state.cache.set_loading(session_id, true);
        state
            .registry
            .record_activity(session_id, Some(preview_of(text)), 1);

        let history = build_history(&prior, &outgoing, &config.context);
        info!(
            session_id = %session_id,
            model = %model,
            history = history.len(),
            first_exchange,
            "Sending message"
        );

        Ok(PendingSend {
            client: self.clone(),
            session_id,
            model,
            handle,
            placeholder_id,
            prompt: text.to_string(),
            outgoing,
            provisional_title: provisional,
            first_exchange,
            history,
        })
    }

    fn apply_event(&self, session_id: SessionId, message_id: &MessageId, event: StreamEvent) -> bool {
        let mut finished = false;
        self.lock().update_message(session_id, message_id, |message| match event {
            StreamEvent::ToolCall {
                correlation_id,
                tool_name,
                tool_input,
            } => {
                debug!(session_id = %session_id, tool = %tool_name, id = %correlation_id, "Tool call");
                if !message.push_tool_call(ToolInteraction::running(
                    correlation_id,
                    tool_name,
                    tool_input,
                )) {
                    debug!(session_id = %session_id, "Ignoring duplicate tool call");
                }
            }
            StreamEvent::ToolResult {
                correlation_id,
                result,
                is_error,
            } => match message.tool_interaction_mut(&correlation_id) {
                Some(interaction) => interaction.finish(result, is_error),
                None => {
                    debug!(session_id = %session_id, id = %correlation_id, "Tool result without matching call");
                }
            },
            StreamEvent::Text {
                token,
                done,
                model,
                total_tokens,
            } => {
                message.content.push_str(&token);
                message.streaming = !done;
                if model.is_some() {
                    message.model = model;
                }
                if total_tokens.is_some() {
                    message.total_tokens = total_tokens;
                }
                finished = done;
            }
        });
        finished
    }

    fn schedule_title_generation(&self, session_id: SessionId) {
        let client = self.clone();
        let delay = self.inner.config.titles.generation_delay();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.refresh_title(session_id).await;
            client.lock().title_tasks.remove(&session_id);
        });

        if let Some(previous) = self.lock().title_tasks.insert(session_id, task) {
            previous.abort();
        }
    }

    /// Asks the backend for a generated title and merges the refreshed
    /// session record. Failures keep the provisional title.
    async fn refresh_title(&self, session_id: SessionId) {
        let exists = self.lock().registry.contains(session_id);
        if !exists {
            debug!(session_id = %session_id, "Session gone; skipping title generation");
            return;
        }
        if let Err(e) = self.inner.store.generate_title(session_id).await {
            warn!(session_id = %session_id, error = %e, "Title generation failed");
            return;
        }
        let sessions = match self.inner.store.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to refresh generated title");
                return;
            }
        };

        let mut state = self.lock();
        if !state.registry.contains(session_id) {
            return;
        }
        let refreshed: Vec<ChatSession> =
            sessions.into_iter().filter(|s| s.id == session_id).collect();
        if let Some(session) = refreshed.first() {
            info!(session_id = %session_id, title = %session.title, "Applied generated title");
        }
        state.registry.merge_sessions(refreshed);
    }
}

fn preview_of(text: &str) -> String {
    text.trim().chars().take(PREVIEW_CHARS).collect()
}

enum StreamEnd {
    Finished,
    Cancelled,
    Failed(TransportError),
}

/// A send whose synchronous half has run. [`PendingSend::run`] streams the
/// reply.
pub struct PendingSend {
    client: ChatClient,
    session_id: SessionId,
    model: String,
    handle: StreamHandle,
    placeholder_id: MessageId,
    prompt: String,
    outgoing: String,
    provisional_title: Option<String>,
    first_exchange: bool,
    history: Vec<HistoryMessage>,
}

impl PendingSend {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn history(&self) -> &[HistoryMessage] {
        &self.history
    }

    pub async fn run(self) -> SendOutcome {
        let inner = Arc::clone(&self.client.inner);
        let session_id = self.session_id;

        // Cancelled between preparation and start: nothing goes out.
        if self.handle.is_cancelled() {
            return self.cancelled();
        }

        if let Some(title) = self.provisional_title.clone() {
            let store = Arc::clone(&inner.store);
            tokio::spawn(async move {
                if let Err(e) = store.rename_session(session_id, &title).await {
                    warn!(session_id = %session_id, error = %e, "Failed to persist provisional title");
                }
            });
        }

        if let Err(e) = inner.prompts.add_prompt(&self.prompt).await {
            warn!(error = %e, "Failed to record prompt history");
        }

        let user_persist = {
            let store = Arc::clone(&inner.store);
            let content = self.outgoing.clone();
            tokio::spawn(async move {
                store
                    .append_message(session_id, Role::User, &content, None)
                    .await
            })
        };

        let request = StreamRequest {
            model: self.model.clone(),
            messages: self.history.clone(),
            tools_enabled: inner.config.tools_enabled,
            session_id,
        };

        let end = self.stream(request).await;
        match end {
            StreamEnd::Finished => self.finish(user_persist).await,
            StreamEnd::Cancelled => self.cancelled(),
            StreamEnd::Failed(e) => {
                warn!(session_id = %session_id, error = %e, "Stream failed");
                let marker = format!("{ERROR_MARKER} {e}");
                let mut state = self.client.lock();
                state.update_message(session_id, &self.placeholder_id, |message| {
                    message.content = marker;
                    message.streaming = false;
                });
                state.end_stream(session_id, &self.handle);
                SendOutcome::Failed {
                    session_id,
                    error: e.to_string(),
                }
            }
        }
    }

    fn cancelled(&self) -> SendOutcome {
        info!(session_id = %self.session_id, "Stream cancelled");
        let mut state = self.client.lock();
        state.update_message(self.session_id, &self.placeholder_id, |message| {
            message.streaming = false;
        });
        state.end_stream(self.session_id, &self.handle);
        SendOutcome::Cancelled {
            session_id: self.session_id,
        }
    }

    async fn stream(&self, request: StreamRequest) -> StreamEnd {
        let token = self.handle.token().clone();

        let bytes = tokio::select! {
            biased;
            () = token.cancelled() => return StreamEnd::Cancelled,
            started = self.client.inner.transport.start_streaming_request(request, token.clone()) => started,
        };
        let mut events = match bytes {
            Ok(bytes) => decode_event_stream(bytes),
            Err(e) if e.is_cancelled() || token.is_cancelled() => return StreamEnd::Cancelled,
            Err(e) => return StreamEnd::Failed(e),
        };

        let mut received = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return StreamEnd::Cancelled,
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    received += 1;
                    if self
                        .client
                        .apply_event(self.session_id, &self.placeholder_id, event)
                    {
                        break;
                    }
                }
                Some(Err(e)) if e.is_cancelled() || token.is_cancelled() => {
                    return StreamEnd::Cancelled;
                }
                Some(Err(e)) => return StreamEnd::Failed(e),
                None if token.is_cancelled() => return StreamEnd::Cancelled,
                None => break,
            }
        }

        debug!(session_id = %self.session_id, events = received, "Stream finished");
        StreamEnd::Finished
    }

    async fn finish(
        self,
        user_persist: JoinHandle<std::result::Result<(), StoreError>>,
    ) -> SendOutcome {
        let session_id = self.session_id;
        let inner = Arc::clone(&self.client.inner);

        let content = {
            let mut state = self.client.lock();
            let mut content = String::new();
            state.update_message(session_id, &self.placeholder_id, |message| {
                message.streaming = false;
                content.clone_from(&message.content);
            });
            content
        };

        match user_persist.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "Failed to persist user message"),
            Err(e) => warn!(session_id = %session_id, error = %e, "User message persistence task failed"),
        }

        if !content.is_empty() {
            if let Err(e) = inner
                .store
                .append_message(session_id, Role::Assistant, &content, Some(&self.model))
                .await
            {
                warn!(session_id = %session_id, error = %e, "Failed to persist assistant message");
            }
        }

        let still_exists = {
            let mut state = self.client.lock();
            if !content.is_empty() {
                state
                    .registry
                    .record_activity(session_id, Some(preview_of(&content)), 1);
            }
            state.end_stream(session_id, &self.handle);
            state.registry.contains(session_id)
        };

        if self.first_exchange && still_exists && !content.is_empty() {
            self.client.schedule_title_generation(session_id);
        }

        info!(session_id = %session_id, chars = content.len(), "Reply complete");
        SendOutcome::Completed {
            session_id,
            message_id: self.placeholder_id,
        }
    }
}
