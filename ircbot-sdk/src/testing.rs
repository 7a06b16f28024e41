//! In-memory server for unit tests.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use crate::client::{Bot, State};
use crate::config::{Config, ConfigStore, SAMPLE};
use crate::transport::Transport;

/// The server end of a duplex stream attached to a [`Bot`].
pub(crate) struct FakeServer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    pub(crate) async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next line the bot sent, without the terminator.
    pub(crate) async fn expect(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(1), self.lines.next_line())
            .await
            .expect("timed out waiting for the bot")
            .unwrap()
            .expect("bot closed the connection")
    }

    /// Assert the bot sends nothing for a short while.
    pub(crate) async fn expect_silence(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.lines.next_line()).await;
        if let Ok(Ok(Some(line))) = next {
            panic!("unexpected line from bot: {line}");
        }
    }
}

/// A running bot on [`SAMPLE`] config, attached to a fake server.
pub(crate) fn connected_bot() -> (Bot, FakeServer) {
    connected_bot_with(SAMPLE)
}

pub(crate) fn connected_bot_with(config: &str) -> (Bot, FakeServer) {
    let config = Config::from_toml(config).unwrap();
    let mut bot = Bot::new(ConfigStore::in_memory(config));
    let (client, server) = tokio::io::duplex(64 * 1024);
    bot.attach(Transport::from_stream(client));
    bot.session.state = State::Running;

    let (read, writer) = tokio::io::split(server);
    let server = FakeServer {
        lines: BufReader::new(read).lines(),
        writer,
    };
    (bot, server)
}
