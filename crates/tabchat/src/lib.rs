pub mod cli;
pub mod commands;

pub use tabchat_core::{api, app, config, session, store, utils};
