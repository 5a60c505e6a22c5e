//! Channel server: connection handling, board sessions and their registry.

use crate::config::Config;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use protocol::Frame;
use std::collections::HashMap;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

pub mod client;
pub mod game;
pub mod gateway;
pub mod registry;

pub use client::Client;
pub use game::{GameSession, Joined, Phase, SessionHandle, SessionSettings, SessionSnapshot};
pub use gateway::{BoardEvent, Subscription, Topic};
pub use registry::SessionRegistry;

/// Connection tracking shared across connection handlers.
#[derive(Debug, Default)]
struct ConnectionState {
    /// Number of connections per IP address.
    ip_connections: HashMap<IpAddr, usize>,
    /// Total number of connections.
    total_connections: usize,
}

impl ConnectionState {
    /// Try to add a connection, returns true if allowed.
    fn try_add_connection(&mut self, ip: IpAddr, max_total: usize, max_per_ip: usize) -> bool {
        if self.total_connections >= max_total {
            return false;
        }

        let current = self.ip_connections.get(&ip).copied().unwrap_or(0);
        if current >= max_per_ip {
            return false;
        }

        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.total_connections += 1;
        true
    }

    fn remove_connection(&mut self, ip: IpAddr) {
        if let Some(count) = self.ip_connections.get_mut(&ip) {
            if *count > 0 {
                *count -= 1;
                self.total_connections = self.total_connections.saturating_sub(1);
            }
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }
    }
}

/// Global and per-IP connection caps.
#[derive(Debug, Clone)]
pub struct ConnectionLimits {
    state: Arc<Mutex<ConnectionState>>,
    max_total: usize,
    max_per_ip: usize,
    next_id: Arc<AtomicU64>,
}

impl ConnectionLimits {
    pub fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::default())),
            max_total,
            max_per_ip,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.server.max_connections, config.server.ip_limit)
    }

    /// Reserve a slot for `ip`. Returns a connection id, or `None` when a limit is hit.
    pub async fn acquire(&self, ip: IpAddr) -> Option<u64> {
        let mut state = self.state.lock().await;
        state
            .try_add_connection(ip, self.max_total, self.max_per_ip)
            .then(|| self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn release(&self, ip: IpAddr) {
        self.state.lock().await.remove_connection(ip);
    }

    pub async fn total(&self) -> usize {
        self.state.lock().await.total_connections
    }
}

/// Query params of the socket URL, as sent by the Phoenix JS client
/// (`/socket/websocket?player_id=...&vsn=2.0.0`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SocketParams {
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub vsn: Option<String>,
}

impl SocketParams {
    /// Parse a raw query string. Unparseable queries yield no params.
    pub fn from_query(query: Option<&str>) -> Self {
        let Some(query) = query else {
            return Self::default();
        };
        serde_urlencoded::from_str(query).unwrap_or_else(|e| {
            debug!("Ignoring socket query {:?}: {}", query, e);
            Self::default()
        })
    }

    /// The connect-time `player_id`, if usable.
    ///
    /// Ids that did not decode as UTF-8 come back with replacement characters
    /// and are refused.
    pub fn player_id(&self) -> Option<String> {
        self.player_id
            .as_deref()
            .filter(|id| !id.trim().is_empty() && !id.contains(char::REPLACEMENT_CHARACTER))
            .map(str::to_string)
    }
}

/// Drain a connection's outbound queue into its websocket sink.
///
/// `wrap` turns an encoded frame into the transport's text message type.
pub async fn write_frames<S, M>(mut sink: S, mut outbound: mpsc::Receiver<Frame>, wrap: fn(String) -> M)
where
    S: Sink<M> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = outbound.recv().await {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} on {}: {}", frame.event, frame.topic, e);
                continue;
            }
        };
        if let Err(e) = sink.send(wrap(text)).await {
            debug!("Socket write failed: {}", e);
            return;
        }
    }
    let _ = sink.close().await;
}

/// Run the standalone channel server.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}/socket/websocket", addr);

    let registry = SessionRegistry::new(SessionSettings::from(&config));
    let limits = ConnectionLimits::from_config(&config);
    let outbound_capacity = config.server.outbound_capacity;

    loop {
        let (stream, addr) = listener.accept().await?;
        let ip = addr.ip();

        let Some(id) = limits.acquire(ip).await else {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        };

        let registry = registry.clone();
        let limits = limits.clone();
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, id, registry, outbound_capacity).await;

            // Always remove from connection tracking when done
            limits.release(ip).await;

            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single websocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: u64,
    registry: SessionRegistry,
    outbound_capacity: usize,
) -> anyhow::Result<()> {
    let mut player_id = None;
    let capture_query = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        player_id = SocketParams::from_query(request.uri().query()).player_id();
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, capture_query).await?;
    info!("New connection from {} (client {})", addr, id);

    let (write, read) = ws_stream.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);
    let writer = tokio::spawn(write_frames(write, outbound_rx, |text| Message::Text(text.into())));
    let client = Client::new(id, addr, player_id, registry, outbound_tx);
    pump(client, read, writer, inbound).await;
    Ok(())
}

fn inbound(msg: &Message) -> Inbound<'_> {
    match msg {
        Message::Text(text) => Inbound::Text(text.as_str()),
        Message::Close(_) => Inbound::Close,
        _ => Inbound::Skip,
    }
}

/// What the reader loop does with one websocket message.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    Text(&'a str),
    Close,
    /// Pings, pongs and binary frames.
    Skip,
}

/// Feed a socket's incoming messages to `client` until the socket or its
/// writer ends, then leave every joined channel.
///
/// `inbound` classifies the transport's message type.
pub async fn pump<R, M, E>(
    mut client: Client,
    mut read: R,
    mut writer: JoinHandle<()>,
    inbound: fn(&M) -> Inbound<'_>,
) where
    R: Stream<Item = Result<M, E>> + Unpin,
    E: Display,
{
    let addr = client.addr;
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => match inbound(&msg) {
                        Inbound::Text(text) => {
                            if client.handle_text(text).await.is_err() {
                                break;
                            }
                        }
                        Inbound::Close => {
                            debug!("Client {} sent close", addr);
                            break;
                        }
                        Inbound::Skip => {}
                    },
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut writer => {
                debug!("Writer for {} stopped", addr);
                break;
            }
        }
    }

    client.disconnect().await;
    writer.abort();
}
