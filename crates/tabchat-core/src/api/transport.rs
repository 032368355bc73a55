use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::error::TransportError;
use crate::api::stream::ByteStream;
use crate::app::message::Role;
use crate::session::SessionId;

/// One entry of the conversation context sent with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub model: String,
    pub messages: Vec<HistoryMessage>,
    pub tools_enabled: bool,
    pub session_id: SessionId,
}

/// Starts a streamed chat request and hands back the raw response body.
///
/// Implementations must stop producing bytes once `cancel` fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start_streaming_request(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError>;
}

/// Transport over HTTP: `POST {base_url}/api/chat` with a JSON body, response
/// body streamed as newline-delimited JSON.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start_streaming_request(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(
            session_id = %request.session_id,
            model = %request.model,
            messages = request.messages.len(),
            "Starting chat stream"
        );

        let send = self.client.post(&url).json(&request).send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status_code: status.as_u16(),
                details,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .take_until(cancel.cancelled_owned());
        Ok(Box::pin(body))
    }
}
