use clap::Parser;
use eyre::Result;

use tabchat::cli::{Cli, Commands, SessionCommands};
use tabchat::commands::{Command, send::SendCommand, session::SessionCommand};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load .env file if it exists
    tabchat::cli::config::load_env()?;

    // Level configured via RUST_LOG
    tabchat_core::utils::tracing::init_tracing()?;

    let config = tabchat::cli::config::load_config(cli.server, cli.model)?;
    debug!(server = %config.server_url, model = ?config.default_model, "Loaded configuration");

    match cli.command {
        Commands::Send {
            session,
            title,
            files,
            text,
        } => {
            SendCommand {
                config,
                session,
                title,
                files,
                text: text.join(" "),
            }
            .execute()
            .await
        }
        Commands::Sessions { action } => {
            SessionCommand {
                command: action.unwrap_or(SessionCommands::List { limit: 20 }),
                config,
            }
            .execute()
            .await
        }
    }
}
