//! Built-in plugins driven through a running bot over an in-memory transport.

use std::path::Path;
use std::time::Duration;

use ircbot_sdk::transport::Transport;
use ircbot_sdk::{Bot, ConfigStore};
use ircbot::seen::SeenStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

struct Server {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Server {
    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn next(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for the bot")
            .unwrap()
    }

    async fn expect(&mut self) -> String {
        self.next().await.expect("bot closed the connection")
    }

    /// Answer a WHOIS for `nick` with a logged-in account, or none.
    async fn whois(&mut self, nick: &str, account: Option<&str>) {
        assert_eq!(self.expect().await, format!("WHOIS {nick}"));
        match account {
            Some(account) => {
                self.send(&format!(":irc.example.net 330 keeper {nick} {account} :is logged in as"))
                    .await
            }
            None => {
                self.send(&format!(":irc.example.net 318 keeper {nick} :End of /WHOIS list."))
                    .await
            }
        }
    }
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("ircbot.toml");
    let text = format!(
        r##"
host = "irc.example.net"
port = 6667
nick = "keeper"
user = "keeper"
desc = "Channel keeper"
channels = ["#one"]
access_mod = []
access_admin = []
access_owner = ["boss"]
plugins = ["core", "seen"]
plugin_dir = '{}'
"##,
        dir.join("data").display()
    );
    std::fs::write(&path, text).unwrap();
    path
}

fn start(config: &Path) -> (Bot, Server) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = ConfigStore::open(config).unwrap();
    let plugins = store.read(|c| c.plugins.clone());
    let mut bot = Bot::new(store);
    ircbot::load_plugins(&mut bot, &plugins).unwrap();

    let (client, server) = tokio::io::duplex(64 * 1024);
    bot.attach(Transport::from_stream(client));
    let (read, writer) = tokio::io::split(server);
    let server = Server {
        lines: BufReader::new(read).lines(),
        writer,
    };
    (bot, server)
}

#[tokio::test]
async fn administers_the_bot_over_chat() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let (mut bot, mut server) = start(&config);
    let task = tokio::spawn(async move { bot.run().await });

    server.send(":irc.example.net 001 keeper :Welcome").await;
    assert_eq!(server.expect().await, "JOIN #one");

    server.send(":alice!a@h PRIVMSG #one :!core help").await;
    let help = server.expect().await;
    assert!(help.starts_with("NOTICE alice :Commands: !core access, !core chanaccess"), "{help}");
    assert!(help.ends_with("!seen seen"), "{help}");

    // Unidentified users cannot speak through the bot.
    server.send(":alice!a@h PRIVMSG #one :!core say #one hi").await;
    server.whois("alice", None).await;
    assert_eq!(
        server.expect().await,
        "NOTICE alice :Permission denied: core say requires moderator access."
    );

    server.send(":boss!b@h PRIVMSG #one :!core setaccess Carol moderator").await;
    server.whois("boss", Some("Boss")).await;
    assert_eq!(server.expect().await, "PRIVMSG #one :carol now has moderator access.");

    server.send(":alice!a@h PRIVMSG #one :keeper: seen seen bob").await;
    assert_eq!(server.expect().await, "PRIVMSG #one :I have not seen bob.");

    server.send(":alice!a@h PRIVMSG #one :!seen seen BOSS").await;
    let seen = server.expect().await;
    assert!(seen.starts_with("PRIVMSG #one :boss was last seen "), "{seen}");
    assert!(seen.ends_with(" in #one saying: !core setaccess Carol moderator"), "{seen}");

    server.send(":boss!b@h PRIVMSG keeper :!core quit done for today").await;
    server.whois("boss", Some("boss")).await;
    assert_eq!(server.expect().await, "QUIT :done for today");
    assert_eq!(server.next().await, None);
    task.await.unwrap().unwrap();

    // The grant was written back to the config file.
    let reloaded = ConfigStore::open(&config).unwrap();
    assert_eq!(reloaded.read(|c| c.access_mod.clone()), vec!["carol".to_string()]);

    // Sightings were flushed on shutdown.
    let store = SeenStore::open(&dir.path().join("data/irc.example.net.6667.keeper/seen.db")).unwrap();
    let boss = store.last_seen("boss").unwrap().unwrap();
    assert_eq!(boss.target, "keeper");
    assert_eq!(boss.text, "!core quit done for today");
}

#[tokio::test]
async fn administrators_cannot_promote_past_themselves() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let (mut bot, mut server) = start(&config);
    bot.set_access("dave", ircbot_sdk::BotAccess::Administrator).unwrap();
    let handle = bot.handle();
    let task = tokio::spawn(async move { bot.run().await });

    server.send(":irc.example.net 001 keeper :Welcome").await;
    assert_eq!(server.expect().await, "JOIN #one");

    server.send(":dave!d@h PRIVMSG #one :!core setaccess erin owner").await;
    server.whois("dave", Some("dave")).await;
    // The target's current tier is looked up by account, without a WHOIS.
    assert_eq!(server.expect().await, "NOTICE dave :You cannot change erin to owner.");

    server.send(":dave!d@h PRIVMSG #one :!core setaccess erin mod").await;
    server.whois("dave", Some("dave")).await;
    assert_eq!(server.expect().await, "PRIVMSG #one :erin now has moderator access.");

    server.send(":dave!d@h PRIVMSG #one :!core quit").await;
    server.whois("dave", Some("dave")).await;
    assert_eq!(
        server.expect().await,
        "NOTICE dave :Permission denied: core quit requires owner access."
    );

    handle.disconnect("bye").await.unwrap();
    assert_eq!(server.expect().await, "QUIT :bye");
    task.await.unwrap().unwrap();
}
