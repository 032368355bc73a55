use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use eyre::{Result, eyre};
use tabchat_core::app::{Attachment, ChatClient, ChatMessage, Role, SendOutcome, SkipReason};
use tabchat_core::config::ClientConfig;
use tabchat_core::session::{DisplayedView, SessionId};
use tracing::{debug, info};

use super::{Command, build_client, open_existing};

pub struct SendCommand {
    pub config: ClientConfig,
    pub session: Option<String>,
    pub title: Option<String>,
    pub files: Vec<PathBuf>,
    pub text: String,
}

#[async_trait]
impl Command for SendCommand {
    async fn execute(&self) -> Result<()> {
        let client = build_client(self.config.clone());

        let session_id = match &self.session {
            Some(raw) => open_existing(&client, raw).await?,
            None => {
                let working_directory = std::env::current_dir()
                    .ok()
                    .map(|dir| dir.display().to_string());
                client
                    .create_session(self.title.clone(), working_directory)
                    .await
            }
        };

        let attachments = self.read_attachments().await?;
        let mut rx = client.subscribe();
        let send = client
            .spawn_send(&self.text, attachments)
            .map_err(skip_error)?;
        info!(session_id = %session_id, "Streaming reply");

        let mut printer = ReplyPrinter::default();
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = rx.borrow_and_update().clone();
                    if !printer.render(&view, session_id)? {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!(session_id = %session_id, "Interrupted");
                    client.cancel(session_id);
                    break;
                }
            }
        }

        let outcome = send
            .await
            .map_err(|e| eyre!("Send task failed: {}", e))?;
        printer.render(&client.displayed(), session_id)?;
        finish(&client, session_id, outcome)
    }
}

impl SendCommand {
    async fn read_attachments(&self) -> Result<Vec<Attachment>> {
        let mut attachments = Vec::with_capacity(self.files.len());
        for path in &self.files {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
            let name = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            attachments.push(Attachment::file(name, content));
        }
        Ok(attachments)
    }
}

fn skip_error(reason: SkipReason) -> eyre::Report {
    match reason {
        SkipReason::NoModelSelected => {
            eyre!("No model selected. Pass --model or set default_model in the config file.")
        }
        SkipReason::NoActiveSession => eyre!("No active session"),
        SkipReason::AlreadyStreaming => eyre!("A reply is already streaming in this session"),
        SkipReason::EmptyMessage => eyre!("Message is empty"),
        SkipReason::Loading => eyre!("Session history is still loading"),
    }
}

fn finish(client: &ChatClient, session_id: SessionId, outcome: SendOutcome) -> Result<()> {
    let mut stdout = std::io::stdout();
    match outcome {
        SendOutcome::Completed { .. } => {
            writeln!(stdout)?;
            if let Some(session) = client.sessions().iter().find(|s| s.id == session_id) {
                writeln!(stdout, "\n[session {} \"{}\"]", session.id, session.title)?;
            }
            Ok(())
        }
        SendOutcome::Cancelled { .. } => {
            writeln!(stdout, "\n[cancelled]")?;
            Ok(())
        }
        SendOutcome::Failed { error, .. } => Err(eyre!("Reply failed: {}", error)),
        SendOutcome::Skipped(reason) => Err(skip_error(reason)),
    }
}

/// Writes the growing reply of one session to stdout.
#[derive(Default)]
struct ReplyPrinter {
    printed: String,
    tools_shown: usize,
}

impl ReplyPrinter {
    /// Prints whatever is new in the reply. Returns false once the reply has
    /// stopped streaming.
    fn render(&mut self, view: &DisplayedView, session_id: SessionId) -> Result<bool> {
        if view.session_id != Some(session_id) {
            return Ok(true);
        }
        let Some(reply) = view
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
        else {
            return Ok(true);
        };

        let mut stdout = std::io::stdout();
        self.render_tools(&mut stdout, reply)?;
        match reply.content.strip_prefix(self.printed.as_str()) {
            Some(delta) => write!(stdout, "{delta}")?,
            // Content was replaced rather than extended.
            None => write!(stdout, "\n{}", reply.content)?,
        }
        stdout.flush()?;
        self.printed.clone_from(&reply.content);

        Ok(reply.streaming)
    }

    fn render_tools(&mut self, out: &mut impl Write, reply: &ChatMessage) -> Result<()> {
        for tool in reply.tool_interactions.iter().skip(self.tools_shown) {
            writeln!(out, "\n[tool {}: {}]", tool.tool_name, tool.status)?;
        }
        self.tools_shown = self.tools_shown.max(reply.tool_interactions.len());
        Ok(())
    }
}
