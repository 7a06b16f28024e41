//! Plugins and the command-handler registry.
//!
//! A plugin registers handlers keyed by `(plugin, command)`. Handlers get
//! exclusive access to the [`Bot`] for the duration of the call, so they
//! can send replies and run account or channel queries directly.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::client::Bot;
use crate::error::Result;
use crate::irc::User;

/// Future returned by a handler. Resolves to whether the handler recognized
/// the invocation.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

/// A parsed command addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub user: User,
    /// Channel or nick the message was sent to.
    pub target: String,
    pub plugin: String,
    pub command: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Where replies go: the channel for channel messages, the sender otherwise.
    pub fn reply_target(&self) -> &str {
        if is_channel(&self.target) {
            &self.target
        } else {
            &self.user.nick
        }
    }

    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }

    /// Arguments from `from` onwards, joined by spaces.
    pub fn rest(&self, from: usize) -> String {
        self.args.get(from..).map(|a| a.join(" ")).unwrap_or_default()
    }
}

pub fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&'])
}

pub trait CommandHandler: Send + Sync {
    fn call<'a>(&'a self, bot: &'a mut Bot, inv: &'a Invocation) -> HandlerFuture<'a>;
}

/// Plain function handler.
pub type HandlerFn = for<'a> fn(&'a mut Bot, &'a Invocation) -> HandlerFuture<'a>;

struct FnHandler(HandlerFn);

impl CommandHandler for FnHandler {
    fn call<'a>(&'a self, bot: &'a mut Bot, inv: &'a Invocation) -> HandlerFuture<'a> {
        (self.0)(bot, inv)
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<(String, String), Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn register(&mut self, plugin: &str, command: &str, handler: Arc<dyn CommandHandler>) {
        let key = (plugin.to_lowercase(), command.to_lowercase());
        if self.handlers.insert(key, handler).is_some() {
            tracing::warn!(plugin, command, "Replaced existing command handler");
        }
    }

    pub fn register_fn(&mut self, plugin: &str, command: &str, handler: HandlerFn) {
        self.register(plugin, command, Arc::new(FnHandler(handler)));
    }

    pub fn lookup(&self, plugin: &str, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .get(&(plugin.to_lowercase(), command.to_lowercase()))
            .cloned()
    }

    /// Registered `(plugin, command)` pairs, sorted.
    pub fn commands(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self.handlers.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn unregister_plugin(&mut self, plugin: &str) {
        let plugin = plugin.to_lowercase();
        self.handlers.retain(|(p, _), _| *p != plugin);
    }
}

/// A unit of bot functionality.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Add this plugin's handlers.
    fn register(self: Arc<Self>, registry: &mut CommandRegistry);

    /// Sees every PRIVMSG and NOTICE before command recognition.
    fn on_message(&self, _from: &User, _target: &str, _text: &str) {}

    /// Flush state to disk. Called before a forced reconnect and on shutdown.
    fn save(&self) -> Result<()> {
        Ok(())
    }

    fn disable(&self) {}
}

#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
    registry: CommandRegistry,
}

impl PluginManager {
    pub fn load(&mut self, plugin: Arc<dyn Plugin>) {
        tracing::info!(plugin = plugin.name(), "Loading plugin");
        Arc::clone(&plugin).register(&mut self.registry);
        self.plugins.push(plugin);
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn save_all(&self) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.save() {
                tracing::error!(plugin = plugin.name(), error = %e, "Unable to save plugin state");
            }
        }
    }

    pub fn disable_all(&mut self) {
        for plugin in self.plugins.drain(..) {
            tracing::info!(plugin = plugin.name(), "Disabling plugin");
            plugin.disable();
            self.registry.unregister_plugin(plugin.name());
        }
    }

    pub fn notify_message(&self, from: &User, target: &str, text: &str) {
        for plugin in &self.plugins {
            plugin.on_message(from, target, text);
        }
    }
}
