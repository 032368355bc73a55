use std::io::Write;

use async_trait::async_trait;
use eyre::{Result, eyre};
use tabchat_core::config::ClientConfig;

use super::super::{Command, build_client, parse_session_id};

pub struct DeleteSessionCommand {
    pub session_id: String,
    pub config: ClientConfig,
}

#[async_trait]
impl Command for DeleteSessionCommand {
    async fn execute(&self) -> Result<()> {
        let session_id = parse_session_id(&self.session_id)?;
        let client = build_client(self.config.clone());
        client
            .load_sessions()
            .await
            .map_err(|e| eyre!("Failed to load sessions: {}", e))?;
        client
            .delete_session(session_id)
            .await
            .map_err(|e| eyre!("Failed to delete session: {}", e))?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Deleted session {session_id}")?;
        Ok(())
    }
}
