use dotenvy::dotenv;
use eyre::Result;
use tabchat_core::config::ClientConfig;

pub fn load_env() -> Result<()> {
    dotenv().ok();
    Ok(())
}

/// Loads the client configuration and applies command-line overrides on
/// top of the file and environment values.
pub fn load_config(server: Option<String>, model: Option<String>) -> Result<ClientConfig> {
    let mut config = ClientConfig::load()?;
    if let Some(server) = server {
        config.server_url = server;
    }
    if model.is_some() {
        config.default_model = model;
    }
    Ok(config)
}
