//! Events emitted by the bot for an optional subscriber.

/// Lifecycle and traffic notifications. Delivery is best-effort: events are
/// dropped when the subscriber falls behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transport opened.
    Connected {
        host: String,
        port: u16,
    },

    /// Welcome received. `nick` is the nick the server confirmed.
    Registered {
        nick: String,
    },

    /// A PRIVMSG or NOTICE, before command recognition.
    Message {
        from: String,
        target: String,
        text: String,
        notice: bool,
    },

    /// A recognized command invocation, before dispatch.
    Command {
        from: String,
        target: String,
        plugin: String,
        command: String,
    },

    /// The liveness watchdog forced a reconnect.
    Reconnecting {
        reason: String,
    },

    Disconnected {
        reason: String,
    },

    /// Every decoded inbound line.
    RawLine(String),
}
