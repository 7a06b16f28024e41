//! Account resolution: map a nick to the services account it is logged in as.
//!
//! Two exchanges are used, chosen by whether the server advertised `WHOX`:
//!
//! - `WHO <nick> %a`, answered by a single 354 carrying the account field
//!   (`0` when not logged in) and closed by 315.
//! - `WHOIS <nick>`, where 330 carries the account directly, 307 either
//!   confirms identification or sends us on to the identity service, and
//!   318 closes the reply.
//!
//! Lines that are not part of the exchange are queued for normal dispatch.

use std::fmt;
use std::sync::Arc;

use crate::client::Bot;
use crate::error::Result;
use crate::irc::{RPL_ENDOFWHO, RPL_ENDOFWHOIS, RPL_WHOISACCOUNT, RPL_WHOISREGNICK, RPL_WHOSPCRPL};

/// Outcome of a completed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Logged in as this account (lowercase).
    Account(String),
    /// Confirmed not logged in.
    Unresolved,
}

impl Resolution {
    /// Interpret a WHOX account field.
    fn from_field(field: &str) -> Self {
        let field = field.trim_start_matches(':');
        if field.is_empty() || field == "0" {
            Self::Unresolved
        } else {
            Self::Account(field.to_lowercase())
        }
    }

    pub fn account(&self) -> Option<&str> {
        match self {
            Self::Account(account) => Some(account),
            Self::Unresolved => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(account) => f.write_str(account),
            Self::Unresolved => f.write_str("0"),
        }
    }
}

/// What a service reply line tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceReply {
    Account(String),
    /// The service has nothing more to say about this nick.
    Finished,
    /// Keep reading.
    Continue,
}

/// A services bot that can be asked which account owns a nick.
pub trait IdentityService: Send + Sync {
    /// Nick the service sends its notices from.
    fn name(&self) -> &str;
    /// Raw command that starts the query.
    fn query(&self, nick: &str) -> String;
    /// Interpret one notice from the service.
    fn interpret(&self, text: &str) -> ServiceReply;
}

/// Atheme/Anope style NickServ.
#[derive(Debug, Default, Clone, Copy)]
pub struct NickServ;

const NICKSERV_TERMINAL: [&str; 5] = [
    "invalid command",
    "*** end of info ***",
    "isn't registered",
    "is not registered",
    "for more verbose information",
];

impl IdentityService for NickServ {
    fn name(&self) -> &str {
        "NickServ"
    }

    fn query(&self, nick: &str) -> String {
        format!("PRIVMSG NickServ :INFO {nick}")
    }

    fn interpret(&self, text: &str) -> ServiceReply {
        let lower = text.to_lowercase();
        if NICKSERV_TERMINAL.iter().any(|phrase| lower.contains(phrase)) {
            return ServiceReply::Finished;
        }
        if !lower.contains("information on") {
            return ServiceReply::Continue;
        }
        // "Information on Alice (account alice):"
        match lower.split_whitespace().last() {
            Some(token) => {
                let account = token.strip_suffix("):").unwrap_or(token);
                ServiceReply::Account(account.to_string())
            }
            None => ServiceReply::Continue,
        }
    }
}

impl Bot {
    /// Find the account a nick is logged in as.
    ///
    /// Fails with [`crate::error::BotError::Interrupted`] when a disconnect or
    /// reconnect arrives mid-exchange, and with a transport error when the
    /// connection breaks.
    pub async fn resolve_account(&mut self, nick: &str) -> Result<Resolution> {
        let resolution = if self.session.whox {
            self.resolve_whox(nick).await?
        } else {
            self.resolve_whois(nick).await?
        };
        tracing::debug!(nick, account = %resolution, "Resolved account");
        Ok(resolution)
    }

    async fn resolve_whox(&mut self, nick: &str) -> Result<Resolution> {
        self.begin_query(&format!("WHO {nick} %a")).await?;
        loop {
            let msg = self.next_query_line().await?;
            match msg.command.as_str() {
                RPL_WHOSPCRPL => return Ok(Resolution::from_field(msg.param(1))),
                RPL_ENDOFWHO if msg.param(1).eq_ignore_ascii_case(nick) => {
                    return Ok(Resolution::Unresolved);
                }
                _ => self.forward(msg),
            }
        }
    }

    async fn resolve_whois(&mut self, nick: &str) -> Result<Resolution> {
        self.begin_query(&format!("WHOIS {nick}")).await?;
        loop {
            let msg = self.next_query_line().await?;
            if !msg.is_numeric() || !msg.param(1).eq_ignore_ascii_case(nick) {
                self.forward(msg);
                continue;
            }
            match msg.command.as_str() {
                RPL_WHOISREGNICK => {
                    let text = msg.trailing().to_lowercase();
                    if text.contains("has identified for this nick") {
                        return Ok(Resolution::Account(msg.param(1).to_lowercase()));
                    }
                    if text.contains("is a registered nick") {
                        return self.ask_identity_service(nick).await;
                    }
                }
                RPL_WHOISACCOUNT => {
                    return Ok(Resolution::from_field(msg.param(2)));
                }
                RPL_ENDOFWHOIS => return Ok(Resolution::Unresolved),
                _ => {}
            }
        }
    }

    async fn ask_identity_service(&mut self, nick: &str) -> Result<Resolution> {
        let service = Arc::clone(&self.identity_service);
        self.begin_query(&service.query(nick)).await?;
        loop {
            let msg = self.next_query_line().await?;
            if msg.command != "NOTICE" || !msg.user().nick.eq_ignore_ascii_case(service.name()) {
                self.forward(msg);
                continue;
            }
            match service.interpret(&msg.text_from(1)) {
                ServiceReply::Account(account) => return Ok(Resolution::Account(account)),
                ServiceReply::Finished => return Ok(Resolution::Unresolved),
                ServiceReply::Continue => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::BotAccess;
    use crate::error::BotError;
    use crate::testing::connected_bot;

    #[test]
    fn nickserv_extracts_account() {
        let ns = NickServ;
        assert_eq!(
            ns.interpret("Information on Alice (account Alice):"),
            ServiceReply::Account("alice".into())
        );
        assert_eq!(ns.interpret("Registered : Jan 01 2020"), ServiceReply::Continue);
        assert_eq!(ns.interpret("*** End of Info ***"), ServiceReply::Finished);
        assert_eq!(ns.interpret("Nick \x02bob\x02 isn't registered."), ServiceReply::Finished);
        assert_eq!(
            ns.interpret("For more verbose information, type /msg NickServ INFO alice ALL."),
            ServiceReply::Finished
        );
    }

    #[test]
    fn unresolved_renders_as_zero() {
        assert_eq!(Resolution::Unresolved.to_string(), "0");
        assert_eq!(Resolution::from_field("0"), Resolution::Unresolved);
        assert_eq!(Resolution::from_field("Alice").account(), Some("alice"));
    }

    #[tokio::test]
    async fn whois_identified_uses_nick_position() {
        let (mut bot, mut server) = connected_bot();
        server.send(":srv 311 keeper Alice a host * :Alice").await;
        server.send(":srv 307 keeper Alice :has identified for this nick").await;

        let res = bot.resolve_account("alice").await.unwrap();
        assert_eq!(res, Resolution::Account("alice".into()));
        assert_eq!(server.expect().await, "WHOIS alice");
    }

    #[tokio::test]
    async fn whois_account_numeric() {
        let (mut bot, mut server) = connected_bot();
        server.send(":srv 330 keeper alice AliceAcct :is logged in as").await;

        let res = bot.resolve_account("alice").await.unwrap();
        assert_eq!(res, Resolution::Account("aliceacct".into()));
        server.expect().await;
    }

    #[tokio::test]
    async fn whois_end_without_account_is_unresolved() {
        let (mut bot, mut server) = connected_bot();
        server.send(":srv 311 keeper alice a host * :Alice").await;
        server.send(":srv 318 keeper alice :End of /WHOIS list.").await;

        assert_eq!(bot.resolve_account("alice").await.unwrap(), Resolution::Unresolved);
        server.expect().await;
    }

    #[tokio::test]
    async fn whois_registered_nick_asks_nickserv() {
        let (mut bot, mut server) = connected_bot();
        server.send(":srv 307 keeper alice :is a registered nick").await;
        server.send(":carol!c@h PRIVMSG #one :unrelated").await;
        server
            .send(":NickServ!services@services NOTICE keeper :Information on alice (account ally):")
            .await;

        assert_eq!(bot.resolve_account("alice").await.unwrap(), Resolution::Account("ally".into()));
        assert_eq!(server.expect().await, "WHOIS alice");
        assert_eq!(server.expect().await, "PRIVMSG NickServ :INFO alice");
        assert_eq!(bot.backlog.len(), 1);
        assert_eq!(bot.backlog[0].command, "PRIVMSG");
    }

    #[tokio::test]
    async fn whox_returns_account_field() {
        let (mut bot, mut server) = connected_bot();
        bot.session.whox = true;
        server.send(":srv NOTICE keeper :unrelated").await;
        server.send(":srv 354 keeper Alice").await;

        assert_eq!(bot.resolve_account("alice").await.unwrap(), Resolution::Account("alice".into()));
        assert_eq!(server.expect().await, "WHO alice %a");
        assert_eq!(bot.backlog.len(), 1);
    }

    #[tokio::test]
    async fn whox_end_of_who_first_is_unresolved() {
        let (mut bot, mut server) = connected_bot();
        bot.session.whox = true;
        server.send(":srv 315 keeper alice :End of /WHO list.").await;

        let res = bot.resolve_account("alice").await.unwrap();
        assert_eq!(res, Resolution::Unresolved);
        assert_eq!(res.to_string(), "0");
    }

    #[tokio::test]
    async fn pings_are_answered_mid_query() {
        let (mut bot, mut server) = connected_bot();
        bot.session.whox = true;
        server.send("PING :tok").await;
        server.send(":srv 354 keeper 0").await;

        assert_eq!(bot.resolve_account("alice").await.unwrap(), Resolution::Unresolved);
        assert_eq!(server.expect().await, "WHO alice %a");
        assert_eq!(server.expect().await, "PONG :tok");
        assert!(bot.backlog.is_empty());
    }

    #[tokio::test]
    async fn disconnect_aborts_pending_lookup() {
        let (mut bot, mut server) = connected_bot();
        bot.handle().disconnect("shutting down").await.unwrap();

        assert!(matches!(bot.resolve_account("alice").await, Err(BotError::Interrupted)));
        assert_eq!(bot.access_level("alice", true).await.unwrap(), BotAccess::NotRegistered);

        bot.run_loop().await.unwrap();
        assert_eq!(server.expect().await, "WHOIS alice");
        assert_eq!(server.expect().await, "QUIT :shutting down");
    }

    #[tokio::test]
    async fn closed_connection_is_a_transport_fault() {
        let (mut bot, server) = connected_bot();
        drop(server);
        let err = bot.resolve_account("alice").await.unwrap_err();
        assert!(err.is_transport());
    }
}
