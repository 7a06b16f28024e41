//! The `core` plugin: help, access inspection and bot administration.
//!
//! | command                        | minimum tier  |
//! |--------------------------------|---------------|
//! | `help`, `access`, `chanaccess` | anyone        |
//! | `mute`, `say`                  | moderator     |
//! | `setaccess`, `join`, `part`, `nick` | administrator |
//! | `quit`                         | owner         |

use std::sync::Arc;

use ircbot_sdk::plugin::is_channel;
use ircbot_sdk::{
    Bot, BotAccess, CommandHandler, CommandRegistry, HandlerFuture, Invocation, Plugin, Result,
};

pub const NAME: &str = "core";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoreCommand {
    Help,
    Access,
    ChanAccess,
    SetAccess,
    Mute,
    Join,
    Part,
    Nick,
    Say,
    Quit,
}

const COMMANDS: [(&str, CoreCommand); 10] = [
    ("help", CoreCommand::Help),
    ("access", CoreCommand::Access),
    ("chanaccess", CoreCommand::ChanAccess),
    ("setaccess", CoreCommand::SetAccess),
    ("mute", CoreCommand::Mute),
    ("join", CoreCommand::Join),
    ("part", CoreCommand::Part),
    ("nick", CoreCommand::Nick),
    ("say", CoreCommand::Say),
    ("quit", CoreCommand::Quit),
];

pub struct CorePlugin;

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn register(self: Arc<Self>, registry: &mut CommandRegistry) {
        for (name, command) in COMMANDS {
            registry.register(NAME, name, Arc::new(command));
        }
    }
}

impl CommandHandler for CoreCommand {
    fn call<'a>(&'a self, bot: &'a mut Bot, inv: &'a Invocation) -> HandlerFuture<'a> {
        Box::pin(self.execute(bot, inv))
    }
}

impl CoreCommand {
    fn required(self) -> BotAccess {
        match self {
            Self::Help | Self::Access | Self::ChanAccess => BotAccess::NotRegistered,
            Self::Mute | Self::Say => BotAccess::Moderator,
            Self::SetAccess | Self::Join | Self::Part | Self::Nick => BotAccess::Administrator,
            Self::Quit => BotAccess::Owner,
        }
    }

    async fn execute(&self, bot: &mut Bot, inv: &Invocation) -> Result<bool> {
        let required = self.required();
        let caller = if required > BotAccess::NotRegistered {
            let level = bot.access_level(&inv.user.nick, true).await?;
            if level < required {
                tracing::info!(nick = %inv.user.nick, %level, %required, "Permission denied");
                let reply = format!("Permission denied: {} {} requires {required} access.", NAME, inv.command);
                bot.send_notice(&inv.user.nick, &reply).await?;
                return Ok(true);
            }
            level
        } else {
            BotAccess::NotRegistered
        };

        match self {
            Self::Help => help(bot, inv).await,
            Self::Access => {
                let nick = inv.arg(0).unwrap_or(inv.user.nick.as_str());
                let level = bot.access_level(nick, true).await?;
                reply(bot, inv, &format!("{nick} has {level} access.")).await
            }
            Self::ChanAccess => {
                let Some(nick) = inv.arg(0) else {
                    return usage(bot, inv, "chanaccess <nick>").await;
                };
                if !is_channel(&inv.target) {
                    return reply(bot, inv, "Use this command in a channel.").await;
                }
                let access = bot.channel_access(nick, &inv.target).await?;
                reply(bot, inv, &format!("{nick} has {access} access in {}.", inv.target)).await
            }
            Self::SetAccess => set_access(bot, inv, caller).await,
            Self::Mute => {
                let target = inv.arg(0).unwrap_or(inv.reply_target()).to_string();
                let muted = bot.toggle_mute(&target);
                let state = if muted { "Muted" } else { "Unmuted" };
                bot.send_notice(&inv.user.nick, &format!("{state} {target}.")).await?;
                Ok(true)
            }
            Self::Join => match inv.arg(0) {
                Some(channel) => {
                    bot.join_channel(channel).await?;
                    Ok(true)
                }
                None => usage(bot, inv, "join <channel>").await,
            },
            Self::Part => {
                let channel = match inv.arg(0) {
                    Some(channel) => channel,
                    None if is_channel(&inv.target) => inv.target.as_str(),
                    None => return usage(bot, inv, "part [channel] [reason]").await,
                };
                let reason = inv.rest(1);
                let reason = (!reason.is_empty()).then_some(reason.as_str());
                bot.leave_channel(channel, reason).await?;
                Ok(true)
            }
            Self::Nick => match inv.arg(0) {
                Some(nick) => {
                    bot.change_nick(nick).await?;
                    Ok(true)
                }
                None => usage(bot, inv, "nick <nick>").await,
            },
            Self::Say => {
                let (Some(target), text) = (inv.arg(0), inv.rest(1)) else {
                    return usage(bot, inv, "say <target> <text>").await;
                };
                if text.is_empty() {
                    return usage(bot, inv, "say <target> <text>").await;
                }
                bot.send_message(target, &text).await?;
                Ok(true)
            }
            Self::Quit => {
                let reason = inv.rest(0);
                let reason = if reason.is_empty() { "Quit" } else { reason.as_str() };
                tracing::info!(nick = %inv.user.nick, reason, "Quit requested");
                bot.request_disconnect(reason);
                Ok(true)
            }
        }
    }
}

async fn help(bot: &mut Bot, inv: &Invocation) -> Result<bool> {
    let prefix = bot.config().cmd_prefix;
    let commands: Vec<String> = bot
        .plugins()
        .registry()
        .commands()
        .into_iter()
        .map(|(plugin, command)| format!("{prefix}{plugin} {command}"))
        .collect();
    let text = format!("Commands: {}", commands.join(", "));
    bot.send_notice(&inv.user.nick, &text).await?;
    Ok(true)
}

async fn set_access(bot: &mut Bot, inv: &Invocation, caller: BotAccess) -> Result<bool> {
    let (Some(account), Some(tier)) = (inv.arg(0), inv.arg(1)) else {
        return usage(bot, inv, "setaccess <account> <tier>").await;
    };
    let Ok(tier) = tier.parse::<BotAccess>() else {
        return usage(bot, inv, "setaccess <account> normal|moderator|administrator|owner").await;
    };

    if caller != BotAccess::Owner {
        let current = bot.access_level(account, false).await?;
        if tier >= caller || current >= caller {
            let reply = format!("You cannot change {account} to {tier}.");
            bot.send_notice(&inv.user.nick, &reply).await?;
            return Ok(true);
        }
    }

    if bot.set_access(account, tier)? {
        reply(bot, inv, &format!("{} now has {tier} access.", account.to_lowercase())).await
    } else {
        reply(bot, inv, &format!("{tier} cannot be assigned.")).await
    }
}

async fn reply(bot: &mut Bot, inv: &Invocation, text: &str) -> Result<bool> {
    bot.send_message(inv.reply_target(), text).await?;
    Ok(true)
}

async fn usage(bot: &mut Bot, inv: &Invocation, syntax: &str) -> Result<bool> {
    let prefix = bot.config().cmd_prefix;
    bot.send_notice(&inv.user.nick, &format!("Usage: {prefix}{NAME} {syntax}"))
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_gate_commands() {
        assert_eq!(CoreCommand::Help.required(), BotAccess::NotRegistered);
        assert_eq!(CoreCommand::Say.required(), BotAccess::Moderator);
        assert_eq!(CoreCommand::Nick.required(), BotAccess::Administrator);
        assert_eq!(CoreCommand::Quit.required(), BotAccess::Owner);
    }

    #[test]
    fn registers_every_command() {
        let mut registry = CommandRegistry::default();
        Arc::new(CorePlugin).register(&mut registry);
        assert_eq!(registry.commands().len(), COMMANDS.len());
        assert!(registry.lookup("CORE", "SetAccess").is_some());
    }
}
