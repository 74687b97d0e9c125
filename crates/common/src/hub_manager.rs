//! SignalR hub connection manager with keepalive, bounded reconnection, and
//! subscription replay.

use crate::error::{Error, Result};
use crate::hub_handler::HubHandler;
use crate::messages::{HubCommand, Invocation, InvocationSink};
use crate::retry::{ConnectionState, ReconnectPolicy, RetryDecision, RetryState};
use crate::signalr::{self, HubMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant};
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for one hub connection.
#[derive(Debug, Clone)]
pub struct HubManagerConfig {
    /// Hub URL, e.g. `wss://rtc.topstepx.com/hubs/market`.
    pub url: String,
    /// Bearer token appended as `access_token`.
    pub access_token: Option<String>,
    /// Reconnect ceiling and delay.
    pub reconnect: ReconnectPolicy,
    /// Timeout for TCP connect plus the SignalR handshake.
    pub handshake_timeout: Duration,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Silence from the server longer than this counts as a lost transport.
    pub server_timeout: Duration,
}

impl Default for HubManagerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: None,
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
        }
    }
}

impl HubManagerConfig {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            access_token,
            ..Default::default()
        }
    }

    /// Full connect URL: websocket scheme plus the access token query.
    pub fn hub_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "https" => Some("wss"),
            "http" => Some("ws"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme)
                .map_err(|_| Error::Connect(format!("cannot switch {} to {}", self.url, scheme)))?;
        }
        if let Some(token) = &self.access_token {
            url.query_pairs_mut().append_pair("access_token", token);
        }
        Ok(url)
    }
}

/// Cloneable handle to a running HubManager.
#[derive(Debug, Clone)]
pub struct HubHandle {
    name: String,
    command_tx: mpsc::UnboundedSender<HubCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl HubHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for_state<F>(&self, predicate: F) -> Result<ConnectionState>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        Ok(*state)
    }

    /// Ask the manager to close the hub. Safe to call more than once.
    pub fn close(&self) {
        if self.command_tx.send(HubCommand::Shutdown).is_err() {
            debug!("[{}] close requested but hub already stopped", self.name);
        }
    }
}

impl InvocationSink for HubHandle {
    fn invoke(&self, invocation: Invocation) -> Result<()> {
        self.command_tx
            .send(HubCommand::Invoke(invocation))
            .map_err(|_| Error::ChannelClosed)
    }
}

/// Live websocket halves plus records that arrived with the handshake reply.
struct Session {
    write: SplitSink<HubStream, Message>,
    read: SplitStream<HubStream>,
    backlog: Vec<String>,
}

enum SessionEnd {
    Shutdown,
    Lost(Error),
}

enum Recovery {
    Established(Session),
    Shutdown,
    Exhausted(u32),
}

/// Hub connection manager.
/// Handles connection lifecycle, keepalive, bounded reconnection, and replay of
/// subscriptions through the handler's lifecycle hooks.
pub struct HubManager<H: HubHandler> {
    handler: Arc<H>,
    config: HubManagerConfig,
    name: String,
    command_rx: mpsc::UnboundedReceiver<HubCommand>,
    state_tx: watch::Sender<ConnectionState>,
    next_invocation_id: u64,
    /// Outbound invocation id -> target, until the hub completes it.
    pending: HashMap<String, String>,
}

impl<H: HubHandler> HubManager<H> {
    /// Create a new hub manager and the handle used to drive it.
    pub fn new(handler: Arc<H>, config: HubManagerConfig) -> (Self, HubHandle) {
        let name = handler.name().to_string();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let handle = HubHandle {
            name: name.clone(),
            command_tx,
            state_rx,
        };
        let manager = Self {
            handler,
            config,
            name,
            command_rx,
            state_tx,
            next_invocation_id: 0,
            pending: HashMap::new(),
        };
        (manager, handle)
    }

    /// Run the hub until shutdown or until reconnect attempts run out.
    ///
    /// A failure of the very first open is returned as-is and never retried.
    pub async fn run(mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        let mut session = match self.open().await {
            Ok(session) => session,
            Err(e) => {
                error!("[{}] Initial connect failed: {}", self.name, e);
                self.set_state(ConnectionState::Disconnected);
                self.handler.on_closed(&e.to_string()).await;
                return Err(e);
            }
        };
        self.set_state(ConnectionState::Connected);
        info!("[{}] Hub connected", self.name);

        let opening = self.handler.on_open();
        self.issue_all(&mut session, opening).await;

        let mut retry = RetryState::new(self.config.reconnect);
        loop {
            match self.drive(&mut session).await {
                SessionEnd::Shutdown => {
                    info!("[{}] Hub closed gracefully", self.name);
                    self.set_state(ConnectionState::Disconnected);
                    self.handler.on_closed("shutdown").await;
                    return Ok(());
                }
                SessionEnd::Lost(e) => {
                    counter!("bridge_disconnects_total", "hub" => self.name.clone()).increment(1);
                    warn!("[{}] Hub disconnected: {}", self.name, e);
                    self.pending.clear();
                    self.handler.on_disconnect(&e.to_string()).await;

                    match self.recover(&mut retry).await {
                        Recovery::Established(next) => {
                            session = next;
                            let replay = self.handler.on_reestablished();
                            info!(
                                "[{}] Hub reestablished, replaying {} subscriptions",
                                self.name,
                                replay.len()
                            );
                            self.issue_all(&mut session, replay).await;
                        }
                        Recovery::Shutdown => {
                            info!("[{}] Shutdown requested while reconnecting", self.name);
                            self.set_state(ConnectionState::Disconnected);
                            self.handler.on_closed("shutdown").await;
                            return Ok(());
                        }
                        Recovery::Exhausted(attempts) => {
                            error!(
                                "[{}] Giving up after {} reconnect attempts",
                                self.name, attempts
                            );
                            self.set_state(ConnectionState::Failed);
                            self.handler
                                .on_closed("reconnect attempts exhausted")
                                .await;
                            return Err(Error::ReconnectExhausted { attempts });
                        }
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("[{}] State -> {}", self.name, state);
        gauge!("bridge_hub_connected", "hub" => self.name.clone())
            .set(if state.is_connected() { 1.0 } else { 0.0 });
        self.state_tx.send_replace(state);
    }

    /// Open a socket and complete the SignalR handshake. Never retries.
    async fn open(&self) -> Result<Session> {
        let url = self.config.hub_url()?;
        info!("[{}] Connecting to hub: {}", self.name, self.config.url);

        let pending = async {
            let tcp_stream = connect_tcp(&self.name, &url).await?;
            let connector = if url.scheme() == "wss" {
                Some(tls_connector()?)
            } else {
                None
            };

            let (ws_stream, response) =
                client_async_tls_with_config(url.as_str(), tcp_stream, None, connector)
                    .await
                    .map_err(|e| Error::Connect(e.to_string()))?;
            debug!(
                "[{}] WebSocket upgrade complete, status: {:?}",
                self.name,
                response.status()
            );

            let (mut write, mut read) = ws_stream.split();
            write
                .send(Message::Text(signalr::handshake_request().into()))
                .await
                .map_err(|e| Error::Connect(e.to_string()))?;
            let backlog = read_handshake(&mut read).await?;
            Ok::<_, Error>(Session {
                write,
                read,
                backlog,
            })
        };

        tokio::time::timeout(self.config.handshake_timeout, pending)
            .await
            .map_err(|_| Error::Connect("handshake timed out".to_string()))?
    }

    /// Sleep through the retry delay and reopen, until success, shutdown, or
    /// the ceiling.
    async fn recover(&mut self, retry: &mut RetryState) -> Recovery {
        loop {
            let (attempt, delay) = match retry.next_attempt() {
                RetryDecision::RetryAfter { attempt, delay } => (attempt, delay),
                RetryDecision::GiveUp { attempts } => return Recovery::Exhausted(attempts),
            };
            self.set_state(ConnectionState::Reconnecting { attempt });
            counter!("bridge_reconnect_attempts_total", "hub" => self.name.clone()).increment(1);
            info!(
                "[{}] Reconnect attempt {}/{} in {:?}",
                self.name, attempt, self.config.reconnect.max_attempts, delay
            );

            if self.wait_or_shutdown(delay).await {
                return Recovery::Shutdown;
            }

            match self.open().await {
                Ok(session) => {
                    if self.discard_queued() {
                        return Recovery::Shutdown;
                    }
                    retry.reset();
                    self.set_state(ConnectionState::Connected);
                    return Recovery::Established(session);
                }
                Err(e) => {
                    warn!("[{}] Reconnect attempt {} failed: {}", self.name, attempt, e);
                }
            }
        }
    }

    /// Drop invokes queued while the channel was down; the replay covers them.
    /// Returns true if a shutdown was queued.
    fn discard_queued(&mut self) -> bool {
        let mut shutdown = false;
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                HubCommand::Invoke(invocation) => debug!(
                    "[{}] Dropping {} queued while reconnecting",
                    self.name, invocation.target
                ),
                HubCommand::Shutdown => shutdown = true,
            }
        }
        shutdown
    }

    /// Sleep for `delay` while still honoring shutdown. Returns true on shutdown.
    async fn wait_or_shutdown(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = self.command_rx.recv() => match cmd {
                    Some(HubCommand::Invoke(invocation)) => {
                        debug!(
                            "[{}] Dropping {} while disconnected",
                            self.name, invocation.target
                        );
                    }
                    Some(HubCommand::Shutdown) | None => return true,
                },
            }
        }
    }

    async fn drive(&mut self, session: &mut Session) -> SessionEnd {
        for record in std::mem::take(&mut session.backlog) {
            if let Some(end) = self.handle_record(&record).await {
                return end;
            }
        }

        let mut ping_interval = interval(self.config.ping_interval);
        ping_interval.reset(); // Don't fire immediately
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                msg = session.read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            if let Some(end) = self.handle_text(text.as_str()).await {
                                return end;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            last_seen = Instant::now();
                            match std::str::from_utf8(&data) {
                                Ok(text) => {
                                    if let Some(end) = self.handle_text(text).await {
                                        return end;
                                    }
                                }
                                Err(e) => warn!("[{}] Non UTF-8 binary frame: {}", self.name, e),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_seen = Instant::now();
                            if let Err(e) = session.write.send(Message::Pong(data)).await {
                                return SessionEnd::Lost(Error::TransportLost(e.to_string()));
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_seen = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return SessionEnd::Lost(Error::TransportLost(format!(
                                "close frame: {:?}",
                                frame
                            )));
                        }
                        Some(Ok(Message::Frame(_))) => {
                            // Raw frame, ignore
                        }
                        Some(Err(e)) => {
                            return SessionEnd::Lost(Error::TransportLost(e.to_string()));
                        }
                        None => {
                            return SessionEnd::Lost(Error::TransportLost(
                                "stream ended".to_string(),
                            ));
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(HubCommand::Invoke(invocation)) => {
                            self.issue(session, invocation).await;
                        }
                        Some(HubCommand::Shutdown) | None => {
                            let close_frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "Shutdown".into(),
                            };
                            let _ = session.write.send(Message::Close(Some(close_frame))).await;
                            return SessionEnd::Shutdown;
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    if last_seen.elapsed() > self.config.server_timeout {
                        return SessionEnd::Lost(Error::TransportLost(format!(
                            "no traffic for {:?}",
                            last_seen.elapsed()
                        )));
                    }
                    if let Err(e) = session
                        .write
                        .send(Message::Text(signalr::ping_frame().into()))
                        .await
                    {
                        return SessionEnd::Lost(Error::TransportLost(e.to_string()));
                    }
                }
            }
        }
    }

    async fn handle_text(&mut self, text: &str) -> Option<SessionEnd> {
        for record in signalr::split_records(text) {
            if let Some(end) = self.handle_record(record).await {
                return Some(end);
            }
        }
        None
    }

    async fn handle_record(&mut self, record: &str) -> Option<SessionEnd> {
        match signalr::parse_message(record) {
            Ok(HubMessage::Invocation { target, arguments }) => {
                if let Err(e) = self.handler.on_invocation(&target, arguments).await {
                    error!("[{}] Error handling {}: {:?}", self.name, target, e);
                }
            }
            Ok(HubMessage::Completion {
                invocation_id,
                error,
            }) => {
                let target = self
                    .pending
                    .remove(&invocation_id)
                    .unwrap_or_else(|| format!("invocation {}", invocation_id));
                if error.is_some() {
                    counter!("bridge_send_errors_total", "hub" => self.name.clone()).increment(1);
                }
                self.handler.on_completion(&target, error.as_deref());
            }
            Ok(HubMessage::Ping) => {}
            Ok(HubMessage::Close {
                error,
                allow_reconnect,
            }) => {
                let reason = error.unwrap_or_else(|| "no reason given".to_string());
                return Some(SessionEnd::Lost(Error::TransportLost(format!(
                    "server closed the hub: {} (allowReconnect={})",
                    reason, allow_reconnect
                ))));
            }
            Ok(HubMessage::Other(kind)) => {
                debug!("[{}] Ignoring hub record type {}", self.name, kind);
            }
            Err(e) => {
                warn!("[{}] Unparseable hub record: {}", self.name, e);
            }
        }
        None
    }

    /// Send one invocation. Failures are logged here and never retried.
    async fn issue(&mut self, session: &mut Session, invocation: Invocation) -> bool {
        self.next_invocation_id += 1;
        let id = self.next_invocation_id;
        let frame = match signalr::encode_invocation(id, &invocation) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[{}] Failed to encode {}: {}", self.name, invocation.target, e);
                counter!("bridge_send_errors_total", "hub" => self.name.clone()).increment(1);
                return false;
            }
        };
        match session.write.send(Message::Text(frame.into())).await {
            Ok(()) => {
                debug!("[{}] -> {} {:?}", self.name, invocation.target, invocation.arguments);
                self.pending.insert(id.to_string(), invocation.target);
                true
            }
            Err(e) => {
                warn!(
                    "[{}] {}",
                    self.name,
                    Error::Send(format!("{}: {}", invocation.target, e))
                );
                counter!("bridge_send_errors_total", "hub" => self.name.clone()).increment(1);
                false
            }
        }
    }

    /// Send each invocation independently, in order. Returns how many went out.
    async fn issue_all(&mut self, session: &mut Session, invocations: Vec<Invocation>) -> usize {
        let mut sent = 0;
        for invocation in invocations {
            if self.issue(session, invocation).await {
                sent += 1;
            }
        }
        sent
    }
}

/// Wait for the handshake reply; anything after it is kept for the session.
async fn read_handshake(read: &mut SplitStream<HubStream>) -> Result<Vec<String>> {
    loop {
        let text = match read.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            Some(Ok(Message::Binary(data))) => String::from_utf8(data.to_vec())
                .map_err(|e| Error::Connect(format!("invalid handshake reply: {}", e)))?,
            Some(Ok(Message::Close(frame))) => {
                return Err(Error::Connect(format!(
                    "closed during handshake: {:?}",
                    frame
                )));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(Error::Connect(e.to_string())),
            None => return Err(Error::Connect("closed during handshake".to_string())),
        };

        let mut records = signalr::split_records(&text);
        let Some(reply) = records.next() else {
            continue;
        };
        signalr::parse_handshake_response(reply).map_err(|e| match e {
            Error::Json(e) => Error::Connect(format!("invalid handshake reply: {}", e)),
            other => other,
        })?;
        return Ok(records.map(str::to_string).collect());
    }
}

/// Resolve the hub host and connect, trying IPv4 addresses first.
async fn connect_tcp(name: &str, url: &Url) -> Result<TcpStream> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::Connect("No host in URL".to_string()))?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::Connect(format!("DNS resolution failed: {}", e)))?
        .collect();

    // Try IPv4 addresses first, then IPv6
    let mut sorted_addrs: Vec<SocketAddr> =
        addrs.iter().filter(|a| a.is_ipv4()).copied().collect();
    sorted_addrs.extend(addrs.iter().filter(|a| a.is_ipv6()).copied());

    for addr in &sorted_addrs {
        debug!("[{}] Trying to connect to {}", name, addr);
        match tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => debug!("[{}] TCP connect to {} failed: {}", name, addr, e),
            Err(_) => debug!("[{}] TCP connect to {} timed out", name, addr),
        }
    }

    Err(Error::Connect(format!(
        "all connection attempts to {}:{} failed",
        host, port
    )))
}

fn tls_connector() -> Result<Connector> {
    let mut root_store = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        let _ = root_store.add(cert);
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Connect(format!("TLS config error: {}", e)))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Connector::Rustls(Arc::new(config)))
}
