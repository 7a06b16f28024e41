//! ircbot: an IRC bot with access-controlled plugin commands.
//!
//! Connects to the server named in the config file, joins its channels and
//! reconnects when the server goes quiet. Ctrl-C quits cleanly.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ircbot_sdk::{Bot, ConfigStore};

#[derive(Parser)]
#[command(name = "ircbot", about = "IRC bot with access-controlled plugin commands")]
struct Args {
    /// Configuration file
    #[arg(long, env = "IRCBOT_CONFIG", default_value = "ircbot.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ircbot=info,ircbot_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    let store = ConfigStore::open(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let plugins = store.read(|c| c.plugins.clone());

    let mut bot = Bot::new(store);
    ircbot::load_plugins(&mut bot, &plugins)?;

    let handle = bot.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            if let Err(e) = handle.disconnect("Shutting down").await {
                tracing::warn!("Failed to request shutdown: {e}");
            }
        }
    });

    bot.run().await?;
    Ok(())
}
