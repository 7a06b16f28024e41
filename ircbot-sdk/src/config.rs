//! Bot configuration.
//!
//! Loaded from a TOML file and validated once against the [`ConfigKey`]
//! table. [`ConfigStore`] is shared between the supervisor and the access
//! table, and rewrites the file whenever an access list changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::access::{AccessStore, BotAccess};
use crate::error::{BotError, Result};

pub const DEFAULT_PLUGIN_DIR: &str = "plugins";
pub const DEFAULT_CMD_PREFIX: &str = "!";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Every key the bot reads, with its persisted name and default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Host,
    Port,
    Nick,
    User,
    Desc,
    Channels,
    AccessMod,
    AccessAdmin,
    AccessOwner,
    PluginDir,
    Plugins,
    CmdPrefix,
    TimeoutSecs,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 13] = [
        Self::Host,
        Self::Port,
        Self::Nick,
        Self::User,
        Self::Desc,
        Self::Channels,
        Self::AccessMod,
        Self::AccessAdmin,
        Self::AccessOwner,
        Self::PluginDir,
        Self::Plugins,
        Self::CmdPrefix,
        Self::TimeoutSecs,
    ];

    /// Name of the key in the config file.
    pub fn key(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Port => "port",
            Self::Nick => "nick",
            Self::User => "user",
            Self::Desc => "desc",
            Self::Channels => "channels",
            Self::AccessMod => "access_mod",
            Self::AccessAdmin => "access_admin",
            Self::AccessOwner => "access_owner",
            Self::PluginDir => "plugin_dir",
            Self::Plugins => "plugins",
            Self::CmdPrefix => "cmd_prefix",
            Self::TimeoutSecs => "timeout_secs",
        }
    }

    /// Default value, `None` for required keys.
    pub fn default_value(self) -> Option<&'static str> {
        match self {
            Self::PluginDir => Some(DEFAULT_PLUGIN_DIR),
            Self::CmdPrefix => Some(DEFAULT_CMD_PREFIX),
            Self::TimeoutSecs => Some("300"),
            _ => None,
        }
    }

    pub fn is_required(self) -> bool {
        self.default_value().is_none()
    }
}

/// Parsed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub user: String,
    pub desc: String,
    pub channels: Vec<String>,
    pub access_mod: Vec<String>,
    pub access_admin: Vec<String>,
    pub access_owner: Vec<String>,
    pub plugins: Vec<String>,
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: String,
    #[serde(default = "default_cmd_prefix")]
    pub cmd_prefix: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_plugin_dir() -> String {
    DEFAULT_PLUGIN_DIR.to_string()
}

fn default_cmd_prefix() -> String {
    DEFAULT_CMD_PREFIX.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    /// Parse and validate. A missing required key is reported by name.
    pub fn from_toml(text: &str) -> Result<Self> {
        let table: toml::Table = text.parse()?;
        if let Some(missing) = ConfigKey::ALL
            .into_iter()
            .find(|key| key.is_required() && !table.contains_key(key.key()))
        {
            return Err(BotError::MissingConfiguration(missing.key()));
        }
        Ok(toml::from_str(text)?)
    }

    /// The durable account list backing a stored tier.
    pub fn access_list(&self, tier: BotAccess) -> Option<&Vec<String>> {
        match tier {
            BotAccess::Moderator => Some(&self.access_mod),
            BotAccess::Administrator => Some(&self.access_admin),
            BotAccess::Owner => Some(&self.access_owner),
            BotAccess::NotRegistered | BotAccess::Normal => None,
        }
    }

    fn access_list_mut(&mut self, tier: BotAccess) -> Option<&mut Vec<String>> {
        match tier {
            BotAccess::Moderator => Some(&mut self.access_mod),
            BotAccess::Administrator => Some(&mut self.access_admin),
            BotAccess::Owner => Some(&mut self.access_owner),
            BotAccess::NotRegistered | BotAccess::Normal => None,
        }
    }
}

struct StoreInner {
    path: Option<PathBuf>,
    config: Config,
}

/// Shared handle on the configuration and the file it came from.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ConfigStore {
    /// Load and validate a config file.
    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BotError::ConfigRead(format!("{}: {e}", path.display())))?;
        let config = Config::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(Self {
            inner: Arc::new(RwLock::new(StoreInner {
                path: Some(path.to_path_buf()),
                config,
            })),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner { path: None, config })),
        }
    }

    /// Read from the current configuration without cloning it.
    pub fn read<T>(&self, f: impl FnOnce(&Config) -> T) -> T {
        f(&self.inner.read().config)
    }

    pub fn snapshot(&self) -> Config {
        self.read(Config::clone)
    }

    /// Write the configuration back to its file, if it has one.
    pub fn save(&self) -> Result<()> {
        let inner = self.inner.read();
        let Some(path) = &inner.path else {
            return Ok(());
        };
        let text = toml::to_string_pretty(&inner.config)
            .map_err(|e| BotError::ConfigWrite(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| BotError::ConfigWrite(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    fn modify_list(&self, tier: BotAccess, f: impl FnOnce(&mut Vec<String>) -> bool) -> Result<()> {
        let changed = {
            let mut inner = self.inner.write();
            match inner.config.access_list_mut(tier) {
                Some(list) => f(list),
                None => false,
            }
        };
        if changed {
            if let Err(e) = self.save() {
                tracing::error!(error = %e, "Unable to save config");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl AccessStore for ConfigStore {
    fn accounts(&self, tier: BotAccess) -> Vec<String> {
        self.read(|c| c.access_list(tier).cloned().unwrap_or_default())
    }

    fn grant(&mut self, tier: BotAccess, account: &str) -> Result<()> {
        let account = account.to_lowercase();
        self.modify_list(tier, |list| {
            if list.iter().any(|a| a.eq_ignore_ascii_case(&account)) {
                false
            } else {
                list.push(account);
                true
            }
        })
    }

    fn revoke(&mut self, tier: BotAccess, account: &str) -> Result<()> {
        self.modify_list(tier, |list| {
            let before = list.len();
            list.retain(|a| !a.eq_ignore_ascii_case(account));
            list.len() != before
        })
    }
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = r##"
host = "irc.example.net"
port = 6667
nick = "keeper"
user = "keeper"
desc = "Channel keeper"
channels = ["#one", "#two"]
access_mod = ["modacct"]
access_admin = []
access_owner = ["boss"]
plugins = ["core"]
"##;
