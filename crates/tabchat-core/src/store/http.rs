use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::{SessionDetail, SessionStore, StoreError};
use crate::app::message::Role;
use crate::session::{ChatSession, SessionId};

/// Session storage backed by the chat service's REST API under
/// `{base_url}/api/sessions`.
#[derive(Debug, Clone)]
pub struct HttpSessionStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct AppendMessageBody<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Serialize)]
struct RenameBody<'a> {
    title: &'a str,
}

impl HttpSessionStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}/api/sessions", self.base_url)
    }

    fn session_url(&self, session_id: SessionId) -> String {
        format!("{}/api/sessions/{session_id}", self.base_url)
    }

    async fn check(response: Response, session_id: Option<SessionId>) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if let (StatusCode::NOT_FOUND, Some(session_id)) = (status, session_id) {
            return Err(StoreError::not_found(session_id));
        }
        let details = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status_code: status.as_u16(),
            details,
        })
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>, StoreError> {
        let response = self.client.get(self.sessions_url()).send().await?;
        let sessions = Self::check(response, None).await?.json().await?;
        Ok(sessions)
    }

    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.sessions_url())
            .json(session)
            .send()
            .await?;
        Self::check(response, None).await?;
        debug!(session_id = %session.id, "Created session on backend");
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.session_url(session_id))
            .send()
            .await?;
        Self::check(response, Some(session_id)).await?;
        Ok(())
    }

    async fn get_session_detail(&self, session_id: SessionId) -> Result<SessionDetail, StoreError> {
        let response = self.client.get(self.session_url(session_id)).send().await?;
        let detail = Self::check(response, Some(session_id)).await?.json().await?;
        Ok(detail)
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: &str,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/messages", self.session_url(session_id)))
            .json(&AppendMessageBody {
                role,
                content,
                model,
            })
            .send()
            .await?;
        Self::check(response, Some(session_id)).await?;
        Ok(())
    }

    async fn rename_session(&self, session_id: SessionId, title: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.session_url(session_id))
            .json(&RenameBody { title })
            .send()
            .await?;
        Self::check(response, Some(session_id)).await?;
        Ok(())
    }

    async fn generate_title(&self, session_id: SessionId) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/title", self.session_url(session_id)))
            .send()
            .await?;
        Self::check(response, Some(session_id)).await?;
        Ok(())
    }
}
