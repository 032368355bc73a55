use std::io::Write;

use async_trait::async_trait;
use eyre::{Result, eyre};
use tabchat_core::config::ClientConfig;

use super::super::{Command, build_client, parse_session_id};

pub struct RenameSessionCommand {
    pub session_id: String,
    pub title: String,
    pub config: ClientConfig,
}

#[async_trait]
impl Command for RenameSessionCommand {
    async fn execute(&self) -> Result<()> {
        let session_id = parse_session_id(&self.session_id)?;
        let client = build_client(self.config.clone());
        client
            .load_sessions()
            .await
            .map_err(|e| eyre!("Failed to load sessions: {}", e))?;
        client
            .rename_session(session_id, &self.title)
            .await
            .map_err(|e| eyre!("Failed to rename session: {}", e))?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Renamed session {} to \"{}\"", session_id, self.title)?;
        Ok(())
    }
}
