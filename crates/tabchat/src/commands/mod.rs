use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, eyre};
use tabchat_core::api::HttpTransport;
use tabchat_core::app::ChatClient;
use tabchat_core::config::ClientConfig;
use tabchat_core::session::SessionId;
use tabchat_core::store::{FilePromptHistory, HttpSessionStore, InMemoryPromptHistory, PromptHistory};

pub mod send;
pub mod session;

#[async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Builds a client talking to the configured chat service.
pub fn build_client(config: ClientConfig) -> ChatClient {
    let transport = Arc::new(HttpTransport::new(config.server_url.as_str()));
    let store = Arc::new(HttpSessionStore::new(config.server_url.as_str()));
    let prompts: Arc<dyn PromptHistory> = match FilePromptHistory::default_path() {
        Some(path) => Arc::new(FilePromptHistory::new(path)),
        None => Arc::new(InMemoryPromptHistory::new()),
    };
    ChatClient::new(config, transport, store, prompts)
}

pub fn parse_session_id(raw: &str) -> Result<SessionId> {
    raw.parse()
        .map_err(|e| eyre!("Invalid session ID '{}': {}", raw, e))
}

/// Loads the session list and opens `session_id`, hydrating its history.
pub async fn open_existing(client: &ChatClient, raw: &str) -> Result<SessionId> {
    let session_id = parse_session_id(raw)?;
    client
        .load_sessions()
        .await
        .map_err(|e| eyre!("Failed to load sessions: {}", e))?;
    client
        .open_session(session_id)
        .await
        .ok_or_else(|| eyre!("Session not found: {}", session_id))?;
    Ok(session_id)
}
