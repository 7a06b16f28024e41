//! Access control: bot privilege tiers, channel privileges and muting.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::account::Resolution;
use crate::client::Bot;
use crate::error::{BotError, Result};
use crate::irc::{RPL_ENDOFNAMES, RPL_NAMREPLY};

/// Privilege tier of an account, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BotAccess {
    /// Not logged in to services. Never stored.
    NotRegistered,
    /// Default for any identified account. Never stored.
    Normal,
    Moderator,
    Administrator,
    Owner,
}

impl BotAccess {
    /// Tiers that have a durable account list.
    pub const STORED: [BotAccess; 3] = [Self::Moderator, Self::Administrator, Self::Owner];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRegistered => "not-registered",
            Self::Normal => "normal",
            Self::Moderator => "moderator",
            Self::Administrator => "administrator",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for BotAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotAccess {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "not-registered" | "notregistered" => Ok(Self::NotRegistered),
            "normal" => Ok(Self::Normal),
            "mod" | "moderator" => Ok(Self::Moderator),
            "admin" | "administrator" => Ok(Self::Administrator),
            "owner" => Ok(Self::Owner),
            other => Err(BotError::Plugin(format!("unknown access tier '{other}'"))),
        }
    }
}

/// Membership privilege of a nick inside one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelAccess {
    None,
    Voice,
    Op,
}

impl ChannelAccess {
    /// Map a NAMES mode prefix character.
    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            '~' | '&' | '@' => Some(Self::Op),
            '%' | '+' => Some(Self::Voice),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Voice => "voice",
            Self::Op => "op",
        })
    }
}

/// Look for `nick` in the trailing part of a NAMES reply.
///
/// Returns the highest privilege among the mode prefixes in front of the
/// nick, or `None` when the nick is not listed.
pub fn names_entry(names: &str, nick: &str) -> Option<ChannelAccess> {
    names.split_whitespace().find_map(|entry| {
        let bare = entry.trim_start_matches(|c: char| ChannelAccess::from_prefix(c).is_some());
        if !bare.eq_ignore_ascii_case(nick) {
            return None;
        }
        let prefixes = &entry[..entry.len() - bare.len()];
        Some(
            prefixes
                .chars()
                .filter_map(ChannelAccess::from_prefix)
                .max()
                .unwrap_or(ChannelAccess::None),
        )
    })
}

/// Durable backing for the stored tiers.
pub trait AccessStore: Send + Sync {
    /// Accounts currently listed under `tier`.
    fn accounts(&self, tier: BotAccess) -> Vec<String>;
    fn grant(&mut self, tier: BotAccess, account: &str) -> Result<()>;
    fn revoke(&mut self, tier: BotAccess, account: &str) -> Result<()>;
}

/// Account → tier table, loaded from and written through to an [`AccessStore`].
pub struct AccessControl {
    levels: HashMap<String, BotAccess>,
    store: Box<dyn AccessStore>,
}

impl AccessControl {
    /// Build the table from the store's lists. Later tiers win on duplicates.
    pub fn load(store: Box<dyn AccessStore>) -> Self {
        let mut levels = HashMap::new();
        for tier in BotAccess::STORED {
            for account in store.accounts(tier) {
                levels.insert(account.to_lowercase(), tier);
            }
        }
        tracing::debug!(entries = levels.len(), "Loaded access table");
        Self { levels, store }
    }

    /// Tier of an already resolved account.
    pub fn level_of(&self, account: &str) -> BotAccess {
        self.levels
            .get(&account.to_lowercase())
            .copied()
            .unwrap_or(BotAccess::Normal)
    }

    /// Set the tier of an account.
    ///
    /// Returns `false` for [`BotAccess::NotRegistered`], which cannot be
    /// stored. Setting [`BotAccess::Normal`] removes the record. The store is
    /// written first; the table only changes once the store has accepted it.
    pub fn update(&mut self, account: &str, tier: BotAccess) -> Result<bool> {
        if tier == BotAccess::NotRegistered {
            return Ok(false);
        }
        let account = account.to_lowercase();
        let previous = self.level_of(&account);
        if previous == tier {
            return Ok(true);
        }

        if tier != BotAccess::Normal {
            self.store.grant(tier, &account)?;
        }
        if previous != BotAccess::Normal {
            if let Err(e) = self.store.revoke(previous, &account) {
                if tier != BotAccess::Normal {
                    if let Err(undo) = self.store.revoke(tier, &account) {
                        tracing::warn!(account = %account, error = %undo, "Unable to undo grant");
                    }
                }
                return Err(e);
            }
        }

        if tier == BotAccess::Normal {
            self.levels.remove(&account);
        } else {
            self.levels.insert(account.clone(), tier);
        }
        tracing::info!(account = %account, from = %previous, to = %tier, "Access changed");
        Ok(true)
    }
}

/// Targets whose outbound messages are dropped. Not persisted.
#[derive(Debug, Default)]
pub struct MuteSet {
    targets: HashSet<String>,
}

impl MuteSet {
    /// Flip the mute state of a target. Returns `true` if it is now muted.
    pub fn toggle(&mut self, target: &str) -> bool {
        let target = target.to_lowercase();
        if self.targets.remove(&target) {
            false
        } else {
            self.targets.insert(target);
            true
        }
    }

    pub fn is_muted(&self, target: &str) -> bool {
        self.targets.contains(&target.to_lowercase())
    }
}

impl Bot {
    /// Privilege tier of a nick (`is_nick`) or of an account name.
    ///
    /// A nick that is not logged in, or whose lookup was cut short by a
    /// disconnect, is [`BotAccess::NotRegistered`]. Transport faults
    /// propagate.
    pub async fn access_level(&mut self, name: &str, is_nick: bool) -> Result<BotAccess> {
        let account = if is_nick {
            match self.resolve_account(name).await {
                Ok(Resolution::Account(account)) => account,
                Ok(Resolution::Unresolved) | Err(BotError::Interrupted) => {
                    return Ok(BotAccess::NotRegistered);
                }
                Err(e) => return Err(e),
            }
        } else {
            name.to_lowercase()
        };
        Ok(self.access.level_of(&account))
    }

    /// Channel privilege of `nick` in `channel`, from a fresh NAMES query.
    pub async fn channel_access(&mut self, nick: &str, channel: &str) -> Result<ChannelAccess> {
        self.begin_query(&format!("NAMES {channel}")).await?;
        loop {
            let msg = self.next_query_line().await?;
            match msg.command.as_str() {
                RPL_NAMREPLY if msg.param(2).eq_ignore_ascii_case(channel) => {
                    if let Some(access) = names_entry(msg.trailing(), nick) {
                        return Ok(access);
                    }
                }
                RPL_ENDOFNAMES if msg.param(1).eq_ignore_ascii_case(channel) => {
                    return Ok(ChannelAccess::None);
                }
                _ => self.forward(msg),
            }
        }
    }

    /// Change the stored tier of an account.
    pub fn set_access(&mut self, account: &str, tier: BotAccess) -> Result<bool> {
        self.access.update(account, tier)
    }

    /// Toggle muting of a target. Returns `true` if it is now muted.
    pub fn toggle_mute(&mut self, target: &str) -> bool {
        self.mutes.toggle(target)
    }

    pub fn is_muted(&self, target: &str) -> bool {
        self.mutes.is_muted(target)
    }
}
