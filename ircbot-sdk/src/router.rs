//! Command recognition, dispatch and outbound delivery.
//!
//! Two addressing forms are recognized in the text of a PRIVMSG or NOTICE:
//!
//! - `!plugin command args...` with the configured prefix glued to the
//!   plugin token,
//! - `keeper: plugin command args...` where the first word starts with the
//!   bot's current nick.
//!
//! Everything the bot says goes through [`Bot::send_message`] or
//! [`Bot::send_notice`], which apply muting and split long text.

use crate::client::Bot;
use crate::error::Result;
use crate::event::Event;
use crate::irc::Message;
use crate::plugin::Invocation;

/// Text longer than this is split.
pub const FRAGMENT_THRESHOLD: usize = 400;
/// Length of each split-off piece.
pub const FRAGMENT_LEN: usize = 401;

pub const MISSING_COMMAND: &str = "Missing command.";

/// Result of looking at a chat line for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    NotAddressed,
    /// Addressed to the bot but without a plugin and command.
    MissingCommand,
    Command {
        plugin: String,
        command: String,
        args: Vec<String>,
    },
}

/// Recognize a command in chat text.
pub fn recognize(text: &str, prefix: &str, nick: &str) -> Recognition {
    let words: Vec<&str> = text.split(' ').filter(|w| !w.is_empty()).collect();
    let Some(first) = words.first() else {
        return Recognition::NotAddressed;
    };

    if let Some(plugin) = first.strip_prefix(prefix).filter(|_| !prefix.is_empty()) {
        if plugin.is_empty() || words.len() < 2 {
            return Recognition::MissingCommand;
        }
        return command(plugin, &words[1..]);
    }

    if !nick.is_empty() && first.to_lowercase().starts_with(&nick.to_lowercase()) {
        if words.len() < 3 {
            return Recognition::MissingCommand;
        }
        return command(words[1], &words[2..]);
    }

    Recognition::NotAddressed
}

fn command(plugin: &str, rest: &[&str]) -> Recognition {
    Recognition::Command {
        plugin: plugin.to_string(),
        command: rest[0].to_string(),
        args: rest[1..].iter().map(|s| s.to_string()).collect(),
    }
}

/// Split text into pieces of at most [`FRAGMENT_LEN`] characters, in order.
/// Text of up to [`FRAGMENT_THRESHOLD`] characters stays whole.
pub fn fragments(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while rest.chars().count() > FRAGMENT_THRESHOLD {
        let split = rest
            .char_indices()
            .nth(FRAGMENT_LEN)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        out.push(&rest[..split]);
        rest = &rest[split..];
    }
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

impl Bot {
    /// Handle an inbound PRIVMSG or NOTICE.
    pub(crate) async fn handle_chat(&mut self, msg: Message) -> Result<()> {
        let user = msg.user();
        let target = msg.param(0).to_string();
        let text = msg.text_from(1);

        self.plugins.notify_message(&user, &target, &text);
        self.emit(Event::Message {
            from: user.nick.clone(),
            target: target.clone(),
            text: text.clone(),
            notice: msg.command == "NOTICE",
        });

        let prefix = self.config.read(|c| c.cmd_prefix.clone());
        match recognize(&text, &prefix, &self.session.nick) {
            Recognition::NotAddressed => Ok(()),
            Recognition::MissingCommand => self.send_notice(&user.nick, MISSING_COMMAND).await,
            Recognition::Command { plugin, command, args } => {
                let inv = Invocation {
                    user,
                    target,
                    plugin,
                    command,
                    args,
                };
                self.dispatch_command(&inv).await
            }
        }
    }

    async fn dispatch_command(&mut self, inv: &Invocation) -> Result<()> {
        tracing::info!(
            from = %inv.user.nick,
            target = %inv.target,
            plugin = %inv.plugin,
            command = %inv.command,
            "Command"
        );
        self.emit(Event::Command {
            from: inv.user.nick.clone(),
            target: inv.target.clone(),
            plugin: inv.plugin.clone(),
            command: inv.command.clone(),
        });

        let handler = self.plugins.registry().lookup(&inv.plugin, &inv.command);
        let handled = match handler {
            Some(handler) => handler.call(self, inv).await?,
            None => false,
        };
        if !handled {
            let reply = format!("Unknown command '{} {}'", inv.plugin, inv.command);
            self.send_notice(&inv.user.nick, &reply).await?;
        }
        Ok(())
    }

    /// Send a PRIVMSG, unless the target is muted.
    pub async fn send_message(&mut self, target: &str, text: &str) -> Result<()> {
        self.deliver("PRIVMSG", target, text).await
    }

    /// Send a NOTICE, unless the target is muted.
    pub async fn send_notice(&mut self, target: &str, text: &str) -> Result<()> {
        self.deliver("NOTICE", target, text).await
    }

    async fn deliver(&mut self, kind: &str, target: &str, text: &str) -> Result<()> {
        if self.mutes.is_muted(target) {
            tracing::debug!(target, "Dropping message to muted target");
            return Ok(());
        }
        // CR and NUL end a line on some servers, same as LF.
        for line in text.split(['\r', '\n', '\0']) {
            for piece in fragments(line) {
                self.send_raw(&format!("{kind} {target} :{piece}")).await?;
            }
        }
        Ok(())
    }
}
