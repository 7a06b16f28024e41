//! Error taxonomy for the bot core.

use std::io;

/// Errors surfaced by the supervisor and its collaborators.
///
/// Protocol-content anomalies (malformed lines, unknown commands, unresolved
/// identities) are tolerated where they occur and only show up here when a
/// caller asks for them explicitly.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Connection refused, reset, or any read/write failure on the transport.
    #[error("transport fault: {0}")]
    Transport(#[from] io::Error),

    /// The server closed the stream.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Fewer than two tokens in a decoded line.
    #[error("malformed line: {0:?}")]
    MalformedLine(String),

    /// A required configuration key is absent. Fatal at construction.
    #[error("missing config key {0}")]
    MissingConfiguration(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] toml::de::Error),

    #[error("unable to read configuration: {0}")]
    ConfigRead(String),

    #[error("unable to save configuration: {0}")]
    ConfigWrite(String),

    /// A pending query was aborted by a disconnect or reconnect request.
    #[error("query interrupted by connection shutdown")]
    Interrupted,

    #[error("not connected")]
    NotConnected,

    #[error("plugin error: {0}")]
    Plugin(String),
}

impl BotError {
    /// Whether this error means the transport is gone.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed | Self::NotConnected)
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
