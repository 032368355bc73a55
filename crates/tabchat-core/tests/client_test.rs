use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tabchat_core::app::{Attachment, ChatClient, ChatMessage, Role, ToolStatus};
use tabchat_core::config::ClientConfig;
use tabchat_core::session::{ChatSession, DisplayedView, SessionId};
use tabchat_core::store::{
    InMemoryPromptHistory, InMemorySessionStore, SessionDetail, SessionStore, StoreError,
    StoredMessage,
};
use tabchat_core::test_utils::{Script, ScriptedTransport, TestHarness};
use tabchat_core::{SendOutcome, SkipReason};
use tokio::sync::Notify;

fn contents(messages: &[ChatMessage]) -> Vec<String> {
    messages.iter().map(|m| m.content.clone()).collect()
}

async fn wait_for_view(h: &TestHarness, predicate: impl FnMut(&DisplayedView) -> bool) {
    let mut rx = h.client.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for displayed view")
        .expect("displayed view channel closed");
}

fn stored(role: Role, content: String) -> StoredMessage {
    StoredMessage {
        id: uuid::Uuid::now_v7().to_string(),
        role,
        content,
        model: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_concurrent_sessions_keep_tokens_apart() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    let gate = Arc::new(Notify::new());
    h.transport.push_for(
        a,
        Script::new().token("alpha ").wait(&gate).done("one"),
    );
    let send_a = h.client.spawn_send("question a", vec![]).unwrap();

    let b = h.client.create_session(None, None).await;
    h.transport
        .push_for(b, Script::new().token("beta ").done("two"));
    let outcome_b = h.client.send_message("question b", vec![]).await;
    assert!(matches!(outcome_b, SendOutcome::Completed { session_id, .. } if session_id == b));
    assert!(h.client.is_streaming(a));

    gate.notify_one();
    let outcome_a = send_a.await.unwrap();
    assert!(matches!(outcome_a, SendOutcome::Completed { session_id, .. } if session_id == a));

    assert_eq!(
        contents(&h.client.messages(a)),
        vec!["question a", "alpha one"]
    );
    assert_eq!(
        contents(&h.client.messages(b)),
        vec!["question b", "beta two"]
    );

    let view = h.client.displayed();
    assert_eq!(view.session_id, Some(b));
    assert_eq!(contents(&view.messages), vec!["question b", "beta two"]);
    assert!(!view.loading);
}

#[tokio::test]
async fn test_switching_back_shows_accumulated_content() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    let gate = Arc::new(Notify::new());
    h.transport.push_for(
        a,
        Script::new()
            .token("one ")
            .wait(&gate)
            .token("two ")
            .done("three"),
    );
    let send_a = h.client.spawn_send("count", vec![]).unwrap();
    wait_for_view(&h, |view| {
        view.messages.last().is_some_and(|m| m.content == "one ")
    })
    .await;

    let b = h.client.create_session(None, None).await;
    gate.notify_one();
    send_a.await.unwrap();

    let view = h.client.displayed();
    assert_eq!(view.session_id, Some(b));
    assert!(view.messages.is_empty());

    h.client.open_session(a).await.unwrap();
    let view = h.client.displayed();
    assert_eq!(view.session_id, Some(a));
    assert_eq!(contents(&view.messages), vec!["count", "one two three"]);
    assert!(!view.messages[1].streaming);
    assert!(!view.loading);
}

#[tokio::test]
async fn test_cancel_after_tool_call_leaves_tool_running() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(
        a,
        Script::new()
            .tool_call("call-1", "bash", &json!({ "command": "ls" }))
            .hang(),
    );
    let send = h.client.spawn_send("list files", vec![]).unwrap();
    wait_for_view(&h, |view| {
        view.messages
            .last()
            .is_some_and(|m| !m.tool_interactions.is_empty())
    })
    .await;

    assert!(h.client.cancel(a));
    assert_eq!(send.await.unwrap(), SendOutcome::Cancelled { session_id: a });

    let messages = h.client.messages(a);
    let reply = &messages[1];
    assert!(!reply.streaming);
    assert_eq!(reply.tool_interactions.len(), 1);
    assert_eq!(reply.tool_interactions[0].status, ToolStatus::Running);
    assert_eq!(reply.tool_interactions[0].tool_name, "bash");
    assert!(!h.client.is_streaming(a));
    assert!(!h.client.displayed().loading);
}

#[tokio::test]
async fn test_tool_result_completes_interaction() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(
        a,
        Script::new()
            .tool_call("call-1", "view", &json!({ "path": "a.txt" }))
            .tool_call("call-1", "view", &json!({ "path": "a.txt" }))
            .tool_result("call-1", "contents", false)
            .tool_result("missing", "ignored", true)
            .done("Here it is."),
    );
    h.client.send_message("show a.txt", vec![]).await;

    let reply = &h.client.messages(a)[1];
    assert_eq!(reply.content, "Here it is.");
    assert_eq!(reply.tool_interactions.len(), 1);
    let tool = &reply.tool_interactions[0];
    assert_eq!(tool.status, ToolStatus::Completed);
    assert_eq!(tool.result.as_deref(), Some("contents"));
    assert_eq!(tool.is_error, Some(false));
}

#[tokio::test]
async fn test_read_failure_replaces_content_with_error_marker() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport
        .push_for(a, Script::new().token("partial").fail("connection reset"));

    let outcome = h.client.send_message("hi", vec![]).await;
    assert!(matches!(outcome, SendOutcome::Failed { session_id, .. } if session_id == a));

    let reply = &h.client.messages(a)[1];
    assert!(reply.content.starts_with("⚠️ Error: "));
    assert!(reply.content.contains("connection reset"));
    assert!(!reply.content.contains("partial"));
    assert!(!reply.streaming);
    assert!(!h.client.is_streaming(a));
    assert!(!h.client.displayed().loading);
}

#[tokio::test]
async fn test_rejected_request_fails() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(a, Script::new().reject(503, "overloaded"));

    let outcome = h.client.send_message("hi", vec![]).await;
    let SendOutcome::Failed { error, .. } = &outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(error.contains("503"));
    assert!(h.client.messages(a)[1].content.contains("overloaded"));
}

#[tokio::test]
async fn test_skip_preconditions() {
    let h = TestHarness::with_config(ClientConfig::default());
    let _ = h.client.create_session(None, None).await;
    assert_eq!(
        h.client.send_message("hi", vec![]).await,
        SendOutcome::Skipped(SkipReason::NoModelSelected)
    );

    let h = TestHarness::new();
    assert_eq!(
        h.client.send_message("hi", vec![]).await,
        SendOutcome::Skipped(SkipReason::NoActiveSession)
    );

    let a = h.client.create_session(None, None).await;
    assert_eq!(
        h.client.send_message("   ", vec![]).await,
        SendOutcome::Skipped(SkipReason::EmptyMessage)
    );
    assert!(h.client.messages(a).is_empty());
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_second_send_while_streaming_is_skipped() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(a, Script::new().token("slow").hang());

    let first = h.client.spawn_send("first", vec![]).unwrap();
    assert_eq!(
        h.client.send_message("second", vec![]).await,
        SendOutcome::Skipped(SkipReason::AlreadyStreaming)
    );
    assert_eq!(h.client.messages(a).len(), 2);

    wait_for_view(&h, |view| {
        view.messages.last().is_some_and(|m| m.content == "slow")
    })
    .await;
    h.client.cancel(a);
    assert_eq!(first.await.unwrap(), SendOutcome::Cancelled { session_id: a });
    assert_eq!(h.transport.requests().len(), 1);
}

#[tokio::test]
async fn test_done_stops_reading_and_persists_reply() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(
        a,
        Script::new()
            .token("Hello")
            .line(&json!({ "token": ", world", "done": true, "model": "served-model", "total_tokens": 42 }))
            .token(" ignored"),
    );

    let outcome = h.client.send_message("greet me", vec![]).await;
    assert!(matches!(outcome, SendOutcome::Completed { .. }));

    let reply = &h.client.messages(a)[1];
    assert_eq!(reply.content, "Hello, world");
    assert_eq!(reply.model.as_deref(), Some("served-model"));
    assert_eq!(reply.total_tokens, Some(42));

    let persisted = h.store.messages(a);
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[0].role, Role::User);
    assert_eq!(persisted[0].content, "greet me");
    assert_eq!(persisted[1].role, Role::Assistant);
    assert_eq!(persisted[1].content, "Hello, world");
    assert_eq!(persisted[1].model.as_deref(), Some("test-model"));
    assert_eq!(h.prompts.prompts(), vec!["greet me"]);
}

#[tokio::test]
async fn test_stream_end_without_done_finalizes() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport
        .push_for(a, Script::new().token("abc").chunk("{\"token\": \"def\"}"));

    let outcome = h.client.send_message("q", vec![]).await;
    assert!(matches!(outcome, SendOutcome::Completed { .. }));
    let reply = &h.client.messages(a)[1];
    assert_eq!(reply.content, "abcdef");
    assert!(!reply.streaming);
}

#[tokio::test(start_paused = true)]
async fn test_empty_reply_is_not_persisted() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(a, Script::new().done(""));

    h.client
        .send_message("alpha beta gamma delta epsilon zeta eta theta", vec![])
        .await;
    let persisted = h.store.messages(a);
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].role, Role::User);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.client.sessions()[0].title, "alpha beta gamma delta epsilon...");
}

#[tokio::test]
async fn test_attachments_are_sent_inline() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(a, Script::new().done("ok"));

    h.client
        .send_message("summarize", vec![Attachment::file("notes.txt", "abc")])
        .await;

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 1);
    let last = requests[0].messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.content, "summarize\n\n--- File: notes.txt ---\nabc");
    assert!(requests[0].tools_enabled);
    assert_eq!(requests[0].model, "test-model");

    let user = &h.client.messages(a)[0];
    assert_eq!(user.content, "summarize");
    assert_eq!(user.attachments.len(), 1);
    assert_eq!(h.store.messages(a)[0].content, last.content);
}

#[tokio::test]
async fn test_history_window_of_twenty_one_messages() {
    let h = TestHarness::new();
    let session_id = SessionId::new();
    let history = (0..21)
        .map(|i| {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            stored(role, "x".repeat(800))
        })
        .collect();
    h.store
        .insert(ChatSession::new(session_id, "Seeded"), history);

    h.client.load_sessions().await.unwrap();
    h.client.open_session(session_id).await.unwrap();
    assert_eq!(h.client.displayed().messages.len(), 21);
    assert!(!h.client.displayed().loading);

    h.transport.push(Script::new().done("ok"));
    h.client.send_message("next", vec![]).await;

    let request = &h.transport.requests()[0];
    assert_eq!(request.session_id, session_id);
    assert_eq!(request.messages.len(), 21);
    for entry in &request.messages[..14] {
        assert_eq!(entry.content.chars().count(), 500 + "\n...[truncated]".len());
    }
    for entry in &request.messages[14..20] {
        assert_eq!(entry.content.len(), 800);
    }
    assert_eq!(request.messages[20].content, "next");
}

#[tokio::test]
async fn test_open_unknown_session_is_noop() {
    let h = TestHarness::new();
    assert!(h.client.open_session(SessionId::new()).await.is_none());
    assert!(h.client.tabs().is_empty());
}

#[tokio::test]
async fn test_clear_cancels_stream() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(a, Script::new().token("x").hang());

    let send = h.client.spawn_send("q", vec![]).unwrap();
    wait_for_view(&h, |view| view.messages.len() == 2).await;

    h.client.clear_session(a);
    assert_eq!(send.await.unwrap(), SendOutcome::Cancelled { session_id: a });
    assert!(h.client.messages(a).is_empty());
    assert!(!h.client.is_streaming(a));

    let view = h.client.displayed();
    assert!(view.messages.is_empty());
    assert!(!view.loading);
}

#[tokio::test]
async fn test_delete_cascades_to_stream_tabs_and_store() {
    let h = TestHarness::new();
    let a = h.client.create_session(Some("A".to_string()), None).await;
    let b = h.client.create_session(Some("B".to_string()), None).await;
    h.client.open_session(a).await.unwrap();
    h.transport.push_for(a, Script::new().token("x").hang());

    let send = h.client.spawn_send("q", vec![]).unwrap();
    h.client.delete_session(a).await.unwrap();
    assert_eq!(send.await.unwrap(), SendOutcome::Cancelled { session_id: a });

    let tabs = h.client.tabs();
    assert_eq!(tabs.len(), 1);
    assert_eq!(tabs[0].session_id, b);
    assert_eq!(h.client.active_session_id(), Some(b));
    assert_eq!(h.client.displayed().session_id, Some(b));
    assert!(h.client.messages(a).is_empty());
    assert!(h.store.session(a).is_none());
    assert!(h.client.sessions().iter().all(|s| s.id != a));

    assert!(h.client.delete_session(a).await.is_err());
}

#[tokio::test]
async fn test_close_tab_keeps_background_stream() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    let gate = Arc::new(Notify::new());
    h.transport
        .push_for(a, Script::new().wait(&gate).done("finished"));
    let send = h.client.spawn_send("q", vec![]).unwrap();

    let tab = h.client.tabs()[0].id;
    assert!(h.client.close_tab(tab).await);
    assert!(h.client.tabs().is_empty());
    assert_eq!(h.client.displayed(), DisplayedView::default());

    gate.notify_one();
    assert!(matches!(send.await.unwrap(), SendOutcome::Completed { .. }));
    assert_eq!(h.client.messages(a)[1].content, "finished");

    h.client.open_session(a).await.unwrap();
    assert_eq!(contents(&h.client.displayed().messages), vec!["q", "finished"]);
}

#[tokio::test(start_paused = true)]
async fn test_titles_provisional_then_generated() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    assert_eq!(h.client.sessions()[0].title, "Chat 1");
    h.transport.push_for(a, Script::new().done("Sure."));

    h.client
        .send_message("Explain how rust lifetimes work in detail please", vec![])
        .await;
    assert_eq!(h.client.sessions()[0].title, "Explain how rust lifetimes wor...");
    assert_eq!(h.client.tabs()[0].title, "Explain how rust lifetimes wor...");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        h.client.sessions()[0].title,
        "Explain how rust lifetimes work in"
    );
    assert_eq!(h.client.tabs()[0].title, "Explain how rust lifetimes work in");
}

#[tokio::test(start_paused = true)]
async fn test_title_generation_skipped_after_delete() {
    let h = TestHarness::new();
    let a = h.client.create_session(None, None).await;
    h.transport.push_for(a, Script::new().done("Sure."));
    h.client.send_message("a question", vec![]).await;

    h.client.delete_session(a).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.client.sessions().is_empty());
    assert!(h.store.session(a).is_none());
}

#[tokio::test]
async fn test_second_exchange_keeps_title() {
    let h = TestHarness::new();
    let a = h.client.create_session(Some("Named".to_string()), None).await;
    h.transport.push_for(a, Script::new().done("one"));
    h.transport.push_for(a, Script::new().done("two"));

    h.client.send_message("first message", vec![]).await;
    h.client.rename_session(a, "Renamed").await.unwrap();
    h.client.send_message("second message", vec![]).await;

    let session = h.client.sessions().into_iter().find(|s| s.id == a).unwrap();
    assert_eq!(session.title, "Renamed");
    assert_eq!(h.transport.requests()[1].messages.len(), 3);
}

/// Holds session detail loads until the gate is notified.
struct GatedStore {
    inner: InMemorySessionStore,
    gate: Arc<Notify>,
}

#[async_trait]
impl SessionStore for GatedStore {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, StoreError> {
        self.inner.list_sessions().await
    }

    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        self.inner.create_session(session).await
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.inner.delete_session(session_id).await
    }

    async fn get_session_detail(&self, session_id: SessionId) -> Result<SessionDetail, StoreError> {
        self.gate.notified().await;
        self.inner.get_session_detail(session_id).await
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: &str,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner
            .append_message(session_id, role, content, model)
            .await
    }

    async fn rename_session(&self, session_id: SessionId, title: &str) -> Result<(), StoreError> {
        self.inner.rename_session(session_id, title).await
    }

    async fn generate_title(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.inner.generate_title(session_id).await
    }
}

#[tokio::test]
async fn test_send_while_history_loads_is_skipped() {
    let gate = Arc::new(Notify::new());
    let store = Arc::new(GatedStore {
        inner: InMemorySessionStore::new(),
        gate: Arc::clone(&gate),
    });
    let session_id = SessionId::new();
    let history = (0..4)
        .map(|i| {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            stored(role, format!("stored {i}"))
        })
        .collect();
    store
        .inner
        .insert(ChatSession::new(session_id, "My important title"), history);

    let transport = Arc::new(ScriptedTransport::new());
    let client = ChatClient::new(
        ClientConfig {
            default_model: Some("test-model".to_string()),
            ..ClientConfig::default()
        },
        transport.clone(),
        store.clone(),
        Arc::new(InMemoryPromptHistory::new()),
    );
    client.load_sessions().await.unwrap();

    let opening = tokio::spawn({
        let client = client.clone();
        async move { client.open_session(session_id).await }
    });
    let mut rx = client.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|view| view.session_id == Some(session_id) && view.loading),
    )
    .await
    .expect("timed out waiting for hydration to start")
    .expect("displayed view channel closed");

    assert_eq!(
        client.send_message("new question", vec![]).await,
        SendOutcome::Skipped(SkipReason::Loading)
    );

    gate.notify_one();
    opening.await.unwrap().unwrap();

    let view = client.displayed();
    assert_eq!(
        contents(&view.messages),
        vec!["stored 0", "stored 1", "stored 2", "stored 3"]
    );
    assert!(!view.loading);
    assert!(transport.requests().is_empty());
    assert_eq!(client.sessions()[0].title, "My important title");

    transport.push(Script::new().done("answer"));
    let outcome = client.send_message("new question", vec![]).await;
    assert!(matches!(outcome, SendOutcome::Completed { .. }));
    assert_eq!(transport.requests()[0].messages.len(), 5);
    assert_eq!(client.sessions()[0].title, "My important title");
    assert_eq!(client.messages(session_id).len(), 6);
}
