//! Message types for conversation representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;
use uuid::Uuid;

/// Role in the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    File,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub kind: AttachmentKind,
    /// File text, or encoded image data.
    pub content: String,
    pub mime_type: String,
}

impl Attachment {
    pub fn file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind: AttachmentKind::File,
            content: content.into(),
            mime_type: "text/plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

/// One tool invocation made by the assistant while producing a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInteraction {
    /// Correlation id shared by the tool_call and tool_result events.
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    pub status: ToolStatus,
}

impl ToolInteraction {
    pub fn running(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            tool_input,
            result: None,
            is_error: None,
            status: ToolStatus::Running,
        }
    }

    pub fn finish(&mut self, result: Option<String>, is_error: Option<bool>) {
        self.status = if is_error.unwrap_or(false) {
            ToolStatus::Error
        } else {
            ToolStatus::Completed
        };
        self.result = result;
        self.is_error = is_error;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_interactions: Vec<ToolInteraction>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// True while content may still grow.
    #[serde(default)]
    pub streaming: bool,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            attachments: Vec::new(),
            tool_interactions: Vec::new(),
            timestamp: Utc::now(),
            model: None,
            total_tokens: None,
            streaming: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An empty assistant message that will be filled by a stream.
    pub fn placeholder(model: impl Into<String>) -> Self {
        let mut message = Self::assistant("");
        message.model = Some(model.into());
        message.streaming = true;
        message
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Content as sent to the model: the typed text followed by every file
    /// attachment as a labeled block.
    pub fn outgoing_content(&self) -> String {
        compose_content(&self.content, &self.attachments)
    }

    /// Records a tool call. A second call with the same correlation id is
    /// ignored.
    pub fn push_tool_call(&mut self, interaction: ToolInteraction) -> bool {
        if self.tool_interactions.iter().any(|t| t.id == interaction.id) {
            return false;
        }
        self.tool_interactions.push(interaction);
        true
    }

    pub fn tool_interaction_mut(&mut self, correlation_id: &str) -> Option<&mut ToolInteraction> {
        self.tool_interactions
            .iter_mut()
            .find(|t| t.id == correlation_id)
    }
}

pub fn compose_content(text: &str, attachments: &[Attachment]) -> String {
    let mut content = text.to_string();
    for attachment in attachments
        .iter()
        .filter(|a| a.kind == AttachmentKind::File)
    {
        content.push_str(&format!(
            "\n\n--- File: {} ---\n{}",
            attachment.name, attachment.content
        ));
    }
    content
}
