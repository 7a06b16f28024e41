//! The `seen` plugin: when and where a nick last spoke.
//!
//! Sightings are kept in memory and written to SQLite when the bot saves
//! plugin state (before a forced reconnect and on shutdown).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ircbot_sdk::irc::User;
use ircbot_sdk::{Bot, BotError, CommandHandler, CommandRegistry, HandlerFuture, Invocation, Plugin};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

pub const NAME: &str = "seen";

/// One observed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub nick: String,
    pub target: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Last-seen table backed by SQLite.
pub struct SeenStore {
    db: Mutex<Connection>,
}

impl SeenStore {
    /// Open or create a seen database.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path).context("Failed to open seen database")?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS seen (
                nick TEXT PRIMARY KEY,
                display TEXT NOT NULL,
                target TEXT NOT NULL,
                text TEXT NOT NULL,
                at TEXT NOT NULL
            );",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Store sightings, replacing older ones for the same nick.
    pub fn record<'a>(&self, sightings: impl IntoIterator<Item = &'a Sighting>) -> Result<usize> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO seen (nick, display, target, text, at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for s in sightings {
                stmt.execute(rusqlite::params![
                    s.nick.to_lowercase(),
                    s.nick,
                    s.target,
                    s.text,
                    s.at.to_rfc3339()
                ])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn last_seen(&self, nick: &str) -> Result<Option<Sighting>> {
        let db = self.db.lock();
        let row = db
            .query_row(
                "SELECT display, target, text, at FROM seen WHERE nick = ?1",
                rusqlite::params![nick.to_lowercase()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((nick, target, text, at)) = row else {
            return Ok(None);
        };
        let at = DateTime::parse_from_rfc3339(&at)
            .with_context(|| format!("Bad timestamp for {nick}"))?
            .with_timezone(&Utc);
        Ok(Some(Sighting {
            nick,
            target,
            text,
            at,
        }))
    }
}

pub struct SeenPlugin {
    store: SeenStore,
    pending: Mutex<HashMap<String, Sighting>>,
}

impl SeenPlugin {
    pub fn new(store: SeenStore) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(SeenStore::open(path)?))
    }

    /// Most recent sighting, unsaved ones first.
    pub fn lookup(&self, nick: &str) -> Result<Option<Sighting>> {
        if let Some(s) = self.pending.lock().get(&nick.to_lowercase()) {
            return Ok(Some(s.clone()));
        }
        self.store.last_seen(nick)
    }

    async fn seen(&self, bot: &mut Bot, inv: &Invocation) -> ircbot_sdk::Result<bool> {
        let Some(nick) = inv.arg(0) else {
            let prefix = bot.config().cmd_prefix;
            bot.send_notice(&inv.user.nick, &format!("Usage: {prefix}{NAME} seen <nick>"))
                .await?;
            return Ok(true);
        };
        let found = self
            .lookup(nick)
            .map_err(|e| BotError::Plugin(e.to_string()))?;
        let text = match found {
            Some(s) => format!(
                "{} was last seen {} in {} saying: {}",
                s.nick,
                s.at.format("%Y-%m-%d %H:%M:%S UTC"),
                s.target,
                s.text
            ),
            None => format!("I have not seen {nick}."),
        };
        bot.send_message(inv.reply_target(), &text).await?;
        Ok(true)
    }
}

impl CommandHandler for SeenPlugin {
    fn call<'a>(&'a self, bot: &'a mut Bot, inv: &'a Invocation) -> HandlerFuture<'a> {
        Box::pin(self.seen(bot, inv))
    }
}

impl Plugin for SeenPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn register(self: Arc<Self>, registry: &mut CommandRegistry) {
        registry.register(NAME, "seen", self);
    }

    fn on_message(&self, from: &User, target: &str, text: &str) {
        // Server notices have no user part.
        if from.user.is_none() {
            return;
        }
        self.pending.lock().insert(
            from.nick.to_lowercase(),
            Sighting {
                nick: from.nick.clone(),
                target: target.to_string(),
                text: text.to_string(),
                at: Utc::now(),
            },
        );
    }

    fn save(&self) -> ircbot_sdk::Result<()> {
        let pending = self.pending.lock().clone();
        if pending.is_empty() {
            return Ok(());
        }
        // Entries stay buffered until the write succeeds.
        let saved = self
            .store
            .record(pending.values())
            .map_err(|e| BotError::Plugin(format!("{NAME}: {e}")))?;
        self.pending
            .lock()
            .retain(|nick, sighting| pending.get(nick) != Some(sighting));
        tracing::debug!(saved, "Saved sightings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::parse("Alice!a@example.org")
    }

    #[test]
    fn pending_sightings_are_visible_before_save() {
        let plugin = SeenPlugin::new(SeenStore::in_memory().unwrap());
        plugin.on_message(&alice(), "#one", "first");
        plugin.on_message(&alice(), "#one", "second");

        let seen = plugin.lookup("ALICE").unwrap().unwrap();
        assert_eq!(seen.nick, "Alice");
        assert_eq!(seen.text, "second");
        assert!(plugin.store.last_seen("alice").unwrap().is_none());
    }

    #[test]
    fn server_notices_are_ignored() {
        let plugin = SeenPlugin::new(SeenStore::in_memory().unwrap());
        plugin.on_message(&User::parse("irc.example.net"), "*", "*** Looking up");
        assert!(plugin.lookup("irc.example.net").unwrap().is_none());
    }

    #[test]
    fn failed_save_keeps_sightings() {
        let plugin = SeenPlugin::new(SeenStore::in_memory().unwrap());
        plugin.on_message(&alice(), "#one", "still here");
        plugin.store.db.lock().execute_batch("DROP TABLE seen").unwrap();

        assert!(plugin.save().is_err());
        assert_eq!(plugin.pending.lock().len(), 1);
        assert_eq!(plugin.lookup("alice").unwrap().unwrap().text, "still here");
    }

    #[test]
    fn save_flushes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.db");

        let plugin = SeenPlugin::open(&path).unwrap();
        plugin.on_message(&alice(), "#two", "bye");
        plugin.save().unwrap();
        assert!(plugin.pending.lock().is_empty());
        drop(plugin);

        let reopened = SeenStore::open(&path).unwrap();
        let seen = reopened.last_seen("alice").unwrap().unwrap();
        assert_eq!(seen.target, "#two");
        assert_eq!(seen.text, "bye");
    }
}
