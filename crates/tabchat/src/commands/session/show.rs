use std::io::Write;

use async_trait::async_trait;
use eyre::Result;
use tabchat_core::config::ClientConfig;

use super::super::{Command, build_client, open_existing};

pub struct ShowSessionCommand {
    pub session_id: String,
    pub config: ClientConfig,
}

#[async_trait]
impl Command for ShowSessionCommand {
    async fn execute(&self) -> Result<()> {
        let client = build_client(self.config.clone());
        let session_id = open_existing(&client, &self.session_id).await?;

        let mut stdout = std::io::stdout();
        if let Some(session) = client.sessions().iter().find(|s| s.id == session_id) {
            writeln!(stdout, "Session: {}", session.id)?;
            writeln!(stdout, "Title: {}", session.title)?;
            if let Some(dir) = &session.working_directory {
                writeln!(stdout, "Directory: {dir}")?;
            }
        }

        let messages = client.messages(session_id);
        writeln!(stdout, "Messages: {}", messages.len())?;
        for message in messages {
            writeln!(stdout, "\n[{}]", message.role)?;
            writeln!(stdout, "{}", message.content)?;
            for tool in &message.tool_interactions {
                writeln!(stdout, "  [tool {}: {}]", tool.tool_name, tool.status)?;
            }
        }

        Ok(())
    }
}
