use std::io::Write;

use async_trait::async_trait;
use chrono::Local;
use eyre::{Result, eyre};
use tabchat_core::config::ClientConfig;

use super::super::{Command, build_client};

pub struct ListSessionCommand {
    pub limit: usize,
    pub config: ClientConfig,
}

#[async_trait]
impl Command for ListSessionCommand {
    async fn execute(&self) -> Result<()> {
        let client = build_client(self.config.clone());
        client
            .load_sessions()
            .await
            .map_err(|e| eyre!("Failed to list sessions: {}", e))?;
        let sessions = client.sessions();

        let mut stdout = std::io::stdout();
        if sessions.is_empty() {
            writeln!(stdout, "No sessions found.")?;
            return Ok(());
        }

        writeln!(stdout, "Sessions:")?;
        writeln!(
            stdout,
            "{:<36} {:<20} {:<10} {:<40}",
            "ID", "Updated", "Messages", "Title"
        )?;
        writeln!(stdout, "{}", "-".repeat(108))?;

        for session in sessions.iter().take(self.limit) {
            writeln!(
                stdout,
                "{:<36} {:<20} {:<10} {:<40}",
                session.id,
                session
                    .updated_at
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S"),
                session.message_count,
                session.title,
            )?;
        }

        Ok(())
    }
}
