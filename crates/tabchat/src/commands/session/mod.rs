use async_trait::async_trait;
use eyre::Result;
use tabchat_core::config::ClientConfig;

use super::Command;
use crate::cli::SessionCommands;

mod delete;
mod list;
mod rename;
mod show;

pub use delete::DeleteSessionCommand;
pub use list::ListSessionCommand;
pub use rename::RenameSessionCommand;
pub use show::ShowSessionCommand;

pub struct SessionCommand {
    pub command: SessionCommands,
    pub config: ClientConfig,
}

#[async_trait]
impl Command for SessionCommand {
    async fn execute(&self) -> Result<()> {
        let config = self.config.clone();
        match &self.command {
            SessionCommands::List { limit } => {
                ListSessionCommand {
                    limit: *limit,
                    config,
                }
                .execute()
                .await
            }
            SessionCommands::Show { session_id } => {
                ShowSessionCommand {
                    session_id: session_id.clone(),
                    config,
                }
                .execute()
                .await
            }
            SessionCommands::Rename { session_id, title } => {
                RenameSessionCommand {
                    session_id: session_id.clone(),
                    title: title.clone(),
                    config,
                }
                .execute()
                .await
            }
            SessionCommands::Delete { session_id } => {
                DeleteSessionCommand {
                    session_id: session_id.clone(),
                    config,
                }
                .execute()
                .await
            }
        }
    }
}
