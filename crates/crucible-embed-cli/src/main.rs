use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod session;

use cli::Cli;
use crucible_embed_config::PersistedState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The persisted debugMode setting turns on verbose logging too
    let debug_mode = if cli.debug {
        true
    } else {
        let store = session::settings_store(cli.settings.as_deref());
        PersistedState::load_from(store.as_ref()).await.settings.debug_mode
    };
    let log_level = if debug_mode { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,crucible_embed={log_level},crucible_embed_config={log_level},embed_lens={log_level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(vault = %cli.vault.display(), command = ?cli.command, "Starting embed-lens");
    commands::execute(cli).await
}
