//! ircbot-sdk: the protocol core of an access-controlled IRC bot.
//!
//! Frames and parses protocol lines, resolves the services account behind
//! a nick, keeps the privilege table, routes `!plugin command` invocations
//! to registered handlers and supervises the connection with a liveness
//! watchdog.

pub mod access;
pub mod account;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod irc;
pub mod plugin;
pub mod router;
pub mod transport;
mod watchdog;

#[cfg(test)]
mod testing;

pub use access::{BotAccess, ChannelAccess};
pub use account::Resolution;
pub use client::{Bot, BotHandle, State};
pub use config::{Config, ConfigStore};
pub use error::{BotError, Result};
pub use event::Event;
pub use plugin::{CommandHandler, CommandRegistry, HandlerFuture, Invocation, Plugin};
