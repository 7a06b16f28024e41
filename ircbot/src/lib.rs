//! Built-in plugins for the `ircbot` binary.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use ircbot_sdk::Bot;

pub mod admin;
pub mod seen;

/// Load the configured plugins. `core` is mandatory.
pub fn load_plugins(bot: &mut Bot, names: &[String]) -> Result<()> {
    if !names.iter().any(|name| name == admin::NAME) {
        bail!("plugin list must include {}", admin::NAME);
    }
    for name in names {
        match name.as_str() {
            admin::NAME => bot.load_plugin(Arc::new(admin::CorePlugin)),
            seen::NAME => {
                let path = bot.plugin_data_dir()?.join("seen.db");
                let plugin = seen::SeenPlugin::open(&path)
                    .with_context(|| format!("Failed to load {name}"))?;
                bot.load_plugin(Arc::new(plugin));
            }
            other => {
                tracing::warn!(plugin = other, "Unknown plugin, skipping");
                continue;
            }
        }
        tracing::info!(plugin = %name, "Loaded plugin");
    }
    Ok(())
}
