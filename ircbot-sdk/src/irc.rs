//! Message parsing for decoded protocol lines.
//!
//! A decoded line has already lost its leading `:` (see [`crate::codec`]),
//! so the first token is always taken as the sender:
//!   sender SPACE command [SPACE params] [SPACE `:` trailing]

use std::fmt;

use crate::error::{BotError, Result};

pub const RPL_WELCOME: &str = "001";
pub const RPL_ISUPPORT: &str = "005";
pub const RPL_WHOISREGNICK: &str = "307";
pub const RPL_ENDOFWHO: &str = "315";
pub const RPL_ENDOFWHOIS: &str = "318";
pub const RPL_WHOISACCOUNT: &str = "330";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_WHOSPCRPL: &str = "354";
pub const RPL_ENDOFNAMES: &str = "366";
pub const ERR_NICKNAMEINUSE: &str = "433";

/// A parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server name or `nick!user@host`.
    pub sender: String,
    /// Command word or three-digit numeric.
    pub command: String,
    /// Parameters; a trailing parameter keeps its inner spaces.
    pub params: Vec<String>,
}

impl Message {
    /// Parse a decoded line. Fails only when fewer than two tokens exist.
    pub fn parse(line: &str) -> Result<Self> {
        let mut rest = line.trim_start_matches(' ');
        let sender = next_token(&mut rest);
        let command = next_token(&mut rest);
        let (Some(sender), Some(command)) = (sender, command) else {
            return Err(BotError::MalformedLine(line.to_string()));
        };

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            if let Some(token) = next_token(&mut rest) {
                params.push(token.to_string());
            }
        }

        Ok(Self {
            sender: sender.to_string(),
            command: command.to_string(),
            params,
        })
    }

    /// Parameter at `idx`, or `""` when the server sent fewer.
    pub fn param(&self, idx: usize) -> &str {
        self.params.get(idx).map(String::as_str).unwrap_or("")
    }

    /// Last parameter, which carries the free text of chat lines and replies.
    pub fn trailing(&self) -> &str {
        self.params.last().map(String::as_str).unwrap_or("")
    }

    /// Parameters from `idx` on, joined by spaces. Recovers chat text that
    /// arrived without a `:` trailing marker.
    pub fn text_from(&self, idx: usize) -> String {
        self.params.get(idx..).map(|p| p.join(" ")).unwrap_or_default()
    }

    pub fn is_numeric(&self) -> bool {
        self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit())
    }

    /// The user who sent this line.
    pub fn user(&self) -> User {
        User::parse(&self.sender)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sender, self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

fn next_token<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let s = rest.trim_start_matches(' ');
    if s.is_empty() {
        *rest = s;
        return None;
    }
    match s.find(' ') {
        Some(idx) => {
            *rest = &s[idx + 1..];
            Some(&s[..idx])
        }
        None => {
            *rest = "";
            Some(s)
        }
    }
}

/// The sender of a message, split into its hostmask parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl User {
    pub fn parse(sender: &str) -> Self {
        let (nick_user, host) = match sender.split_once('@') {
            Some((left, host)) => (left, Some(host.to_string())),
            None => (sender, None),
        };
        let (nick, user) = match nick_user.split_once('!') {
            Some((nick, user)) => (nick.to_string(), Some(user.to_string())),
            None => (nick_user.to_string(), None),
        };
        Self { nick, user, host }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nick)?;
        if let Some(user) = &self.user {
            write!(f, "!{user}")?;
        }
        if let Some(host) = &self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}
