//! Test utilities for tabchat-core
//!
//! Scripted collaborators that let tests drive a `ChatClient` without a
//! backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::api::{ByteStream, StreamRequest, Transport, TransportError};
use crate::app::ChatClient;
use crate::config::ClientConfig;
use crate::session::SessionId;
use crate::store::{InMemoryPromptHistory, InMemorySessionStore};

#[derive(Debug, Clone)]
enum Step {
    Chunk(Bytes),
    Wait(Arc<Notify>),
    Fail(String),
    Hang,
}

/// The body one scripted request produces.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
    reject: Option<(u16, String)>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes, delivered as one chunk.
    pub fn chunk(mut self, bytes: impl Into<String>) -> Self {
        self.steps.push(Step::Chunk(Bytes::from(bytes.into())));
        self
    }

    /// One JSON line.
    pub fn line(self, value: &Value) -> Self {
        self.chunk(format!("{value}\n"))
    }

    pub fn token(self, token: &str) -> Self {
        self.line(&json!({ "token": token }))
    }

    pub fn done(self, token: &str) -> Self {
        self.line(&json!({ "token": token, "done": true }))
    }

    pub fn tool_call(self, id: &str, name: &str, input: &Value) -> Self {
        self.line(&json!({
            "type": "tool_call",
            "tool_use_id": id,
            "tool_name": name,
            "tool_input": input,
        }))
    }

    pub fn tool_result(self, id: &str, result: &str, is_error: bool) -> Self {
        self.line(&json!({
            "type": "tool_result",
            "tool_use_id": id,
            "result": result,
            "is_error": is_error,
        }))
    }

    /// Pauses the body until `gate` is notified.
    pub fn wait(mut self, gate: &Arc<Notify>) -> Self {
        self.steps.push(Step::Wait(Arc::clone(gate)));
        self
    }

    /// Ends the body with a read error.
    pub fn fail(mut self, details: impl Into<String>) -> Self {
        self.steps.push(Step::Fail(details.into()));
        self
    }

    /// Never produces anything further.
    pub fn hang(mut self) -> Self {
        self.steps.push(Step::Hang);
        self
    }

    /// Fails the request itself with an HTTP status.
    pub fn reject(mut self, status_code: u16, details: impl Into<String>) -> Self {
        self.reject = Some((status_code, details.into()));
        self
    }
}

#[derive(Default)]
struct Scripts {
    by_session: HashMap<SessionId, VecDeque<Script>>,
    fallback: VecDeque<Script>,
    requests: Vec<StreamRequest>,
}

/// Transport that replays queued [`Script`]s and records every request.
///
/// Scripts queued for a session are used first; otherwise the next script
/// from the shared queue is used. With nothing queued the body is empty.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<Scripts>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: Script) {
        self.lock().fallback.push_back(script);
    }

    pub fn push_for(&self, session_id: SessionId, script: Script) {
        self.lock()
            .by_session
            .entry(session_id)
            .or_default()
            .push_back(script);
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Scripts> {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_script(&self, request: StreamRequest) -> Script {
        let mut guard = self.lock();
        let scripts = &mut *guard;
        let session_id = request.session_id;
        scripts.requests.push(request);
        scripts
            .by_session
            .get_mut(&session_id)
            .and_then(VecDeque::pop_front)
            .or_else(|| scripts.fallback.pop_front())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn start_streaming_request(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let script = self.next_script(request);
        if let Some((status_code, details)) = script.reject {
            return Err(TransportError::Status {
                status_code,
                details,
            });
        }

        let steps = script.steps;
        let body = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Chunk(bytes) => yield Ok(bytes),
                    Step::Wait(gate) => gate.notified().await,
                    Step::Fail(details) => {
                        yield Err(TransportError::read(details));
                        return;
                    }
                    Step::Hang => futures_util::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(body.take_until(cancel.cancelled_owned())))
    }
}

/// A client wired to scripted and in-memory collaborators.
pub struct TestHarness {
    pub client: ChatClient,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<InMemorySessionStore>,
    pub prompts: Arc<InMemoryPromptHistory>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(ClientConfig {
            default_model: Some("test-model".to_string()),
            ..ClientConfig::default()
        })
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(InMemorySessionStore::new());
        let prompts = Arc::new(InMemoryPromptHistory::new());
        let client = ChatClient::new(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&store) as Arc<dyn crate::store::SessionStore>,
            Arc::clone(&prompts) as Arc<dyn crate::store::PromptHistory>,
        );
        Self {
            client,
            transport,
            store,
            prompts,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
