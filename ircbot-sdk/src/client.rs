//! Connection supervisor.
//!
//! [`Bot`] owns the connection and every piece of mutable session state.
//! All of it is driven from one task: the read loop, command handlers and
//! account queries run with `&mut Bot`, and anything outside that task
//! (the liveness watchdog, a [`BotHandle`]) talks to it through a
//! [`Control`] channel.
//!
//! ## Lifecycle
//!
//! `Disconnected → Connecting → AwaitingWelcome → Registered → Running →
//! Disconnecting → Disconnected`
//!
//! The watchdog is the only thing that reconnects on its own. Transport
//! faults end [`Bot::run`] with an error.
//!
//! ## Queries
//!
//! Account and channel queries read the shared stream directly. Lines that
//! do not belong to the query are parked in a backlog that the read loop
//! drains before reading again, so nothing is lost and no handler runs
//! inside another one.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::access::{AccessControl, MuteSet};
use crate::account::{IdentityService, NickServ};
use crate::codec::{self, LineReader};
use crate::config::{Config, ConfigStore};
use crate::error::{BotError, Result};
use crate::event::Event;
use crate::irc::{ERR_NICKNAMEINUSE, Message, RPL_ISUPPORT, RPL_WELCOME};
use crate::plugin::{Plugin, PluginManager};
use crate::transport::{Connector, TcpConnector, Transport};
use crate::watchdog::{Activity, Watchdog};

/// Per-read timeout while waiting for the server greeting.
const WELCOME_READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Marker the server puts in its pre-registration notices.
const CONNECTING_MARKER: &str = "***";
/// Stop waiting for the greeting after this many markers.
const WELCOME_MARKERS: usize = 4;
const MAX_NICK_ATTEMPTS: u32 = 5;
const PING_TIMEOUT_REASON: &str = "Ping timeout";

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    AwaitingWelcome,
    /// NICK and USER sent, welcome not yet received.
    Registered,
    Running,
    Disconnecting,
}

/// Requests handled on the supervisor's own task.
#[derive(Debug)]
pub(crate) enum Control {
    Send(String),
    Privmsg { target: String, text: String },
    Disconnect(String),
    /// Traffic was seen since the last check; probe the server.
    KeepAlive { generation: u64 },
    /// No traffic since the last check.
    LivenessTimeout { generation: u64 },
}

impl Control {
    /// Whether this request has to wait until no query is pending.
    fn ends_session(&self) -> bool {
        matches!(self, Self::Disconnect(_) | Self::LivenessTimeout { .. })
    }
}

/// Session state owned by the supervisor.
pub(crate) struct Session {
    pub(crate) nick: String,
    /// Server advertised WHOX in 005.
    pub(crate) whox: bool,
    pub(crate) state: State,
    nick_attempts: u32,
}

struct Connection {
    reader: LineReader<Box<dyn AsyncBufRead + Unpin + Send>>,
    writer: Box<dyn AsyncWrite + Unpin + Send>,
}

enum Wake {
    Line(String),
    Control(Control),
}

/// Cloneable handle for controlling a bot from another task.
#[derive(Clone)]
pub struct BotHandle {
    control: mpsc::Sender<Control>,
}

impl BotHandle {
    /// Ask the bot to quit. Any pending account query is aborted.
    pub async fn disconnect(&self, reason: &str) -> Result<()> {
        self.send(Control::Disconnect(reason.to_string())).await
    }

    pub async fn raw(&self, line: &str) -> Result<()> {
        self.send(Control::Send(line.to_string())).await
    }

    /// Send a PRIVMSG, subject to muting and splitting like any reply.
    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send(Control::Privmsg {
            target: target.to_string(),
            text: text.to_string(),
        })
        .await
    }

    async fn send(&self, control: Control) -> Result<()> {
        self.control.send(control).await.map_err(|_| BotError::NotConnected)
    }
}

/// A bot connected to one server.
pub struct Bot {
    pub(crate) config: ConfigStore,
    pub(crate) session: Session,
    conn: Option<Connection>,
    connector: Arc<dyn Connector>,
    pub(crate) identity_service: Arc<dyn IdentityService>,
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    /// Session-ending requests that arrived while a query was pending.
    deferred: VecDeque<Control>,
    /// Lines read by a query that belong to normal dispatch.
    pub(crate) backlog: VecDeque<Message>,
    pub(crate) access: AccessControl,
    pub(crate) mutes: MuteSet,
    pub(crate) plugins: PluginManager,
    activity: Arc<Activity>,
    watchdog: Option<Watchdog>,
    generation: u64,
    liveness_timeout: Duration,
    events: Option<mpsc::Sender<Event>>,
    interrupted: bool,
}

impl Bot {
    pub fn new(config: ConfigStore) -> Self {
        let (control_tx, control_rx) = mpsc::channel(64);
        let snapshot = config.snapshot();
        Self {
            access: AccessControl::load(Box::new(config.clone())),
            session: Session {
                nick: snapshot.nick.clone(),
                whox: false,
                state: State::Disconnected,
                nick_attempts: 0,
            },
            liveness_timeout: Duration::from_secs(snapshot.timeout_secs),
            config,
            conn: None,
            connector: Arc::new(TcpConnector),
            identity_service: Arc::new(NickServ),
            control_tx,
            control_rx,
            deferred: VecDeque::new(),
            backlog: VecDeque::new(),
            mutes: MuteSet::default(),
            plugins: PluginManager::default(),
            activity: Arc::new(Activity::default()),
            watchdog: None,
            generation: 0,
            events: None,
            interrupted: false,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_identity_service(mut self, service: Arc<dyn IdentityService>) -> Self {
        self.identity_service = service;
        self
    }

    /// Override the configured liveness timeout. The watchdog checks at half
    /// this interval.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Receive [`Event`]s. Replaces any previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(256);
        self.events = Some(tx);
        rx
    }

    pub fn handle(&self) -> BotHandle {
        BotHandle {
            control: self.control_tx.clone(),
        }
    }

    pub fn load_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.load(plugin);
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn state(&self) -> State {
        self.session.state
    }

    /// Current nick.
    pub fn nick(&self) -> &str {
        &self.session.nick
    }

    pub fn config(&self) -> Config {
        self.config.snapshot()
    }

    /// `<plugin_dir>/<host>.<port>.<nick>`, created if missing.
    pub fn plugin_data_dir(&self) -> Result<PathBuf> {
        let dir = self.config.read(|c| {
            PathBuf::from(&c.plugin_dir).join(format!("{}.{}.{}", c.host, c.port, c.nick))
        });
        std::fs::create_dir_all(&dir)
            .map_err(|e| BotError::Plugin(format!("{}: {e}", dir.display())))?;
        Ok(dir)
    }

    /// Connect, register and serve until disconnected.
    pub async fn run(&mut self) -> Result<()> {
        let result = match self.conn {
            Some(_) => {
                if self.watchdog.is_none() {
                    self.arm_watchdog();
                }
                self.run_loop().await
            }
            None => match self.connect().await {
                Ok(()) => self.run_loop().await,
                Err(e) => Err(e),
            },
        };
        self.plugins.save_all();
        self.plugins.disable_all();
        tracing::info!("Terminating");
        result
    }

    /// Open the transport, wait for the greeting and register.
    ///
    /// A disconnect request that arrives meanwhile stops here and leaves the
    /// bot disconnected. Other requests wait for the read loop.
    pub async fn connect(&mut self) -> Result<()> {
        let (host, port) = self.config.read(|c| (c.host.clone(), c.port));
        self.session.state = State::Connecting;
        tracing::info!(host = %host, port, "Connecting");

        let connector = Arc::clone(&self.connector);
        let mut connecting = connector.connect(&host, port);
        let result = loop {
            let control = tokio::select! {
                result = &mut connecting => break result,
                Some(control) = self.control_rx.recv() => control,
            };
            if let Control::Disconnect(reason) = control {
                self.disconnect(&reason).await;
                return Ok(());
            }
            self.deferred.push_back(control);
        };
        drop(connecting);
        let transport = match result {
            Ok(transport) => transport,
            Err(e) => {
                self.session.state = State::Disconnected;
                return Err(e);
            }
        };
        self.attach(transport);
        self.emit(Event::Connected { host, port });

        self.await_welcome().await?;
        if self.interrupted {
            return Ok(());
        }
        self.register().await
    }

    /// Use an already open transport. [`Bot::run`] then serves it directly,
    /// without waiting for a greeting or registering, under a fresh liveness
    /// watchdog.
    pub fn attach(&mut self, transport: Transport) {
        self.conn = Some(Connection {
            reader: LineReader::new(transport.reader),
            writer: transport.writer,
        });
        self.session.nick = self.config.read(|c| c.nick.clone());
        self.session.whox = false;
        self.session.nick_attempts = 0;
        self.session.state = State::AwaitingWelcome;
        self.interrupted = false;
    }

    /// Best-effort wait for the server greeting.
    async fn await_welcome(&mut self) -> Result<()> {
        let mut markers = 0;
        while markers < WELCOME_MARKERS {
            let conn = self.conn.as_mut().ok_or(BotError::NotConnected)?;
            let wake = tokio::select! {
                read = tokio::time::timeout(WELCOME_READ_TIMEOUT, conn.reader.read_line()) => match read {
                    Ok(line) => Wake::Line(line?.ok_or(BotError::ConnectionClosed)?),
                    Err(_) => break,
                },
                Some(control) = self.control_rx.recv() => Wake::Control(control),
            };
            let line = match wake {
                Wake::Line(line) => line,
                Wake::Control(Control::Disconnect(reason)) => {
                    self.disconnect(&reason).await;
                    return Ok(());
                }
                Wake::Control(control) => {
                    self.deferred.push_back(control);
                    continue;
                }
            };
            self.receive(&line);
            if let Some(token) = ping_token(&line) {
                self.send_raw(&format!("PONG :{token}")).await?;
            } else if line.contains(CONNECTING_MARKER) {
                markers += 1;
            }
        }
        tracing::debug!(markers, "Done waiting for greeting");
        Ok(())
    }

    async fn register(&mut self) -> Result<()> {
        let (user, desc) = self.config.read(|c| (c.user.clone(), c.desc.clone()));
        let nick = self.session.nick.clone();
        self.send_raw(&format!("NICK {nick}")).await?;
        self.send_raw(&format!("USER {user} * * :{desc}")).await?;
        self.session.state = State::Registered;
        self.arm_watchdog();
        Ok(())
    }

    /// Start a watchdog for the current connection, replacing any older one.
    fn arm_watchdog(&mut self) {
        self.generation += 1;
        self.watchdog = Some(Watchdog::arm(
            self.liveness_timeout / 2,
            self.generation,
            Arc::clone(&self.activity),
            self.control_tx.clone(),
        ));
    }

    /// Read and dispatch until disconnected.
    pub(crate) async fn run_loop(&mut self) -> Result<()> {
        while !self.interrupted {
            let step = if let Some(control) = self.deferred.pop_front() {
                self.on_control(control).await
            } else if let Some(msg) = self.backlog.pop_front() {
                self.dispatch(msg).await
            } else {
                match self.wait().await {
                    Ok(Wake::Line(line)) => self.on_line(line).await,
                    Ok(Wake::Control(control)) => self.on_control(control).await,
                    Err(e) => Err(e),
                }
            };

            match step {
                Ok(()) | Err(BotError::Interrupted) => {}
                Err(e) if e.is_transport() => {
                    tracing::error!(error = %e, "Connection lost");
                    self.disconnect(&e.to_string()).await;
                    return Err(e);
                }
                Err(e) => tracing::warn!(error = %e, "Error while handling line"),
            }
        }
        Ok(())
    }

    /// Wait for the next inbound line or control request.
    async fn wait(&mut self) -> Result<Wake> {
        let conn = self.conn.as_mut().ok_or(BotError::NotConnected)?;
        let wake = tokio::select! {
            line = conn.reader.read_line() => {
                Wake::Line(line?.ok_or(BotError::ConnectionClosed)?)
            }
            Some(control) = self.control_rx.recv() => Wake::Control(control),
        };
        Ok(wake)
    }

    fn receive(&mut self, line: &str) {
        self.activity.touch();
        tracing::debug!(line, "<<");
        self.emit(Event::RawLine(line.to_string()));
    }

    async fn on_line(&mut self, line: String) -> Result<()> {
        self.receive(&line);
        if let Some(token) = ping_token(&line) {
            return self.send_raw(&format!("PONG :{token}")).await;
        }
        match Message::parse(&line) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping line");
                Ok(())
            }
        }
    }

    async fn dispatch(&mut self, msg: Message) -> Result<()> {
        match msg.command.as_str() {
            RPL_WELCOME => self.on_welcome(&msg).await,
            RPL_ISUPPORT => {
                if msg.params.iter().any(|p| p == "WHOX" || p.starts_with("WHOX=")) {
                    tracing::debug!("Server supports WHOX");
                    self.session.whox = true;
                }
                Ok(())
            }
            ERR_NICKNAMEINUSE if self.session.state != State::Running => self.retry_nick().await,
            "PRIVMSG" | "NOTICE" => self.handle_chat(msg).await,
            _ => Ok(()),
        }
    }

    async fn on_welcome(&mut self, msg: &Message) -> Result<()> {
        self.session.state = State::Running;
        if !msg.param(0).is_empty() {
            self.session.nick = msg.param(0).to_string();
        }
        tracing::info!(nick = %self.session.nick, "Registered");
        self.emit(Event::Registered {
            nick: self.session.nick.clone(),
        });
        let channels = self.config.read(|c| c.channels.clone());
        for channel in channels {
            self.join_channel(&channel).await?;
        }
        Ok(())
    }

    async fn retry_nick(&mut self) -> Result<()> {
        self.session.nick_attempts += 1;
        if self.session.nick_attempts > MAX_NICK_ATTEMPTS {
            tracing::error!("No free nick after {MAX_NICK_ATTEMPTS} attempts");
            self.disconnect("Nick in use").await;
            return Ok(());
        }
        let base = self.config.read(|c| c.nick.clone());
        let nick = format!("{base}{}", self.session.nick_attempts);
        tracing::warn!(nick = %nick, "Nick in use, retrying");
        self.session.nick = nick.clone();
        self.send_raw(&format!("NICK {nick}")).await
    }

    async fn on_control(&mut self, control: Control) -> Result<()> {
        match control {
            Control::Send(line) => self.send_raw(&line).await,
            Control::Privmsg { target, text } => self.send_message(&target, &text).await,
            Control::Disconnect(reason) => {
                self.disconnect(&reason).await;
                Ok(())
            }
            Control::KeepAlive { generation } if generation == self.generation => {
                let host = self.config.read(|c| c.host.clone());
                self.send_raw(&format!("PING :{host}")).await
            }
            Control::LivenessTimeout { generation } if generation == self.generation => {
                self.reconnect().await
            }
            Control::KeepAlive { generation } | Control::LivenessTimeout { generation } => {
                tracing::debug!(generation, current = self.generation, "Ignoring stale watchdog signal");
                Ok(())
            }
        }
    }

    /// Tear down and connect again after a liveness timeout.
    async fn reconnect(&mut self) -> Result<()> {
        tracing::warn!("No traffic within liveness timeout, reconnecting");
        self.plugins.save_all();
        self.emit(Event::Reconnecting {
            reason: PING_TIMEOUT_REASON.to_string(),
        });
        self.teardown(PING_TIMEOUT_REASON).await;
        self.connect().await
    }

    /// Close the connection: farewell, shutdown, cancel the watchdog.
    async fn teardown(&mut self, reason: &str) {
        self.session.state = State::Disconnecting;
        self.watchdog = None;
        self.backlog.clear();
        if let Some(mut conn) = self.conn.take() {
            let quit = codec::encode(&format!("QUIT :{reason}"));
            if let Err(e) = conn.writer.write_all(&quit).await {
                tracing::warn!(error = %e, "Unable to send QUIT");
            }
            let _ = conn.writer.shutdown().await;
        }
        self.session.state = State::Disconnected;
    }

    /// Quit and stop the read loop.
    pub async fn disconnect(&mut self, reason: &str) {
        tracing::info!(reason, "Disconnecting");
        self.teardown(reason).await;
        self.interrupted = true;
        self.emit(Event::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Disconnect once the current handler returns. Pending queries abort.
    pub fn request_disconnect(&mut self, reason: &str) {
        self.deferred.push_back(Control::Disconnect(reason.to_string()));
    }

    /// Send a raw protocol line.
    pub async fn send_raw(&mut self, line: &str) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(BotError::NotConnected)?;
        tracing::debug!(line, ">>");
        conn.writer.write_all(&codec::encode(line)).await?;
        conn.writer.flush().await?;
        Ok(())
    }

    pub async fn join_channel(&mut self, channel: &str) -> Result<()> {
        self.send_raw(&format!("JOIN {channel}")).await
    }

    pub async fn leave_channel(&mut self, channel: &str, reason: Option<&str>) -> Result<()> {
        match reason {
            Some(reason) => self.send_raw(&format!("PART {channel} :{reason}")).await,
            None => self.send_raw(&format!("PART {channel}")).await,
        }
    }

    /// Change nick. The new nick is used for mention addressing right away.
    pub async fn change_nick(&mut self, nick: &str) -> Result<()> {
        self.send_raw(&format!("NICK {nick}")).await?;
        self.session.nick = nick.to_string();
        Ok(())
    }

    /// Send the opening line of a query, unless the session is ending.
    pub(crate) async fn begin_query(&mut self, line: &str) -> Result<()> {
        if self.session_ending() {
            return Err(BotError::Interrupted);
        }
        self.send_raw(line).await
    }

    /// Next parsed line for a pending query.
    ///
    /// PINGs are answered here. Session-ending control requests are kept
    /// for the read loop and abort the query with [`BotError::Interrupted`].
    pub(crate) async fn next_query_line(&mut self) -> Result<Message> {
        loop {
            if self.session_ending() {
                return Err(BotError::Interrupted);
            }
            match self.wait().await? {
                Wake::Control(control) if control.ends_session() => {
                    self.deferred.push_back(control);
                }
                Wake::Control(control) => self.on_control(control).await?,
                Wake::Line(line) => {
                    self.receive(&line);
                    if let Some(token) = ping_token(&line) {
                        self.send_raw(&format!("PONG :{token}")).await?;
                        continue;
                    }
                    match Message::parse(&line) {
                        Ok(msg) => return Ok(msg),
                        Err(e) => tracing::warn!(error = %e, "Dropping line"),
                    }
                }
            }
        }
    }

    fn session_ending(&self) -> bool {
        self.interrupted || self.deferred.iter().any(Control::ends_session)
    }

    /// Hand a line read by a query back to normal dispatch.
    pub(crate) fn forward(&mut self, msg: Message) {
        self.backlog.push_back(msg);
    }

    pub(crate) fn emit(&self, event: Event) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

fn ping_token(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("PING")?;
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    let token = rest.trim_start();
    Some(token.strip_prefix(':').unwrap_or(token))
}
