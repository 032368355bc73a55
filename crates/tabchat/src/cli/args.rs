use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// A tabbed chat client that streams replies from a chat service.
#[derive(Parser)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// Base URL of the chat service (overrides the config file)
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Model to use for replies (overrides the config file)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Send a message and stream the reply to stdout
    Send {
        /// Session to send in (a new session is created if omitted)
        #[arg(long)]
        session: Option<String>,

        /// Title for a newly created session
        #[arg(long, conflicts_with = "session")]
        title: Option<String>,

        /// Files to attach to the message (repeatable)
        #[arg(short, long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Session management commands (lists sessions by default)
    Sessions {
        #[command(subcommand)]
        action: Option<SessionCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SessionCommands {
    /// List sessions, most recently updated first
    List {
        /// Maximum number of sessions to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show the messages of a session
    Show {
        /// Session ID
        session_id: String,
    },
    /// Rename a session
    Rename {
        /// Session ID
        session_id: String,
        /// New title
        title: String,
    },
    /// Delete a session
    Delete {
        /// Session ID
        session_id: String,
    },
}
