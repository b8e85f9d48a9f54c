//! Game Server
//!
//! Async TCP server, with an optional WebSocket listener, for the arena.
//!
//! Connection tasks only move bytes. Every decoded frame is forwarded to a
//! single world task that owns the [`World`] and all sessions, so commands
//! and ticks never interleave.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::rng::DeterministicRng;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::grid::{Grid, MapError, MapLoadOptions};
use crate::game::world::{GameConfig, World};
use crate::network::codec::{encode, FrameDecoder, DEFAULT_MAX_FRAME};
use crate::network::protocol::ServerMessage;
use crate::network::session::{ConnectionId, SessionManager};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address.
    pub bind_addr: SocketAddr,
    /// WebSocket bind address, if enabled.
    pub ws_bind_addr: Option<SocketAddr>,
    /// Map file.
    pub map_path: PathBuf,
    /// World ticks per second.
    pub tick_rate: u32,
    /// Seed phrase for wall randomization. Clock-derived when unset.
    pub seed: Option<String>,
    /// Drop connections silent for this long.
    pub idle_timeout: Option<Duration>,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest inbound frame accepted.
    pub max_frame: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            ws_bind_addr: None,
            map_path: PathBuf::from("maps/simple.map"),
            tick_rate: crate::TICK_RATE,
            seed: None,
            idle_timeout: Some(Duration::from_secs(300)),
            max_connections: 64,
            max_frame: DEFAULT_MAX_FRAME,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BOMBER_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse("BOMBER_BIND") {
            config.bind_addr = addr;
        }
        if let Some(addr) = env_parse("BOMBER_WS_BIND") {
            config.ws_bind_addr = Some(addr);
        }
        if let Ok(path) = std::env::var("BOMBER_MAP") {
            config.map_path = PathBuf::from(path);
        }
        if let Some(rate) = env_parse::<u32>("BOMBER_TICK_RATE") {
            config.tick_rate = rate.max(1);
        }
        if let Ok(seed) = std::env::var("BOMBER_SEED") {
            config.seed = Some(seed);
        }
        if let Some(secs) = env_parse::<u64>("BOMBER_IDLE_TIMEOUT_SECS") {
            // 0 disables
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(max) = env_parse("BOMBER_MAX_CONNECTIONS") {
            config.max_connections = max;
        }

        config
    }

    /// Interval between world ticks.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Map file unreadable.
    #[error("Failed to read map {path:?}: {source}")]
    MapFile {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Map file rejected.
    #[error("Invalid map: {0}")]
    Map(#[from] MapError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Load the configured map and build a world around it.
pub fn load_world(config: &ServerConfig, game: GameConfig) -> Result<World, GameServerError> {
    let text = std::fs::read_to_string(&config.map_path).map_err(|source| GameServerError::MapFile {
        path: config.map_path.clone(),
        source,
    })?;

    let mut rng = match &config.seed {
        Some(phrase) => DeterministicRng::from_phrase(phrase),
        None => DeterministicRng::new(clock_seed()),
    };
    let grid = Grid::parse(&text, MapLoadOptions::randomized(&mut rng, game.wall_probability))?;
    info!(
        map = %config.map_path.display(),
        width = grid.width(),
        height = grid.height(),
        spawns = grid.spawns().len(),
        "Map loaded"
    );

    Ok(World::new(grid, game))
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Traffic from connection tasks to the world task.
#[derive(Debug)]
pub enum Inbound {
    /// Connection accepted.
    Opened {
        /// Connection id.
        id: ConnectionId,
        /// Peer address.
        addr: SocketAddr,
        /// Reply channel.
        sender: mpsc::Sender<ServerMessage>,
    },
    /// One decoded frame.
    Message {
        /// Connection id.
        id: ConnectionId,
        /// Decoded value.
        value: serde_json::Value,
    },
    /// Bytes that did not decode.
    Malformed {
        /// Connection id.
        id: ConnectionId,
        /// Decoder error.
        reason: String,
    },
    /// Connection gone.
    Closed {
        /// Connection id.
        id: ConnectionId,
    },
}

type ClientMap = Arc<RwLock<BTreeMap<ConnectionId, SocketAddr>>>;

/// Final `ERR` sent to every session when the server stops.
pub const SHUTDOWN_NOTICE: &str = "server shutting down";

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Connected clients.
    clients: ClientMap,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured listeners and run until shutdown.
    pub async fn run(&self, world: World) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let ws_listener = match self.config.ws_bind_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        self.serve(listener, ws_listener, world).await
    }

    /// Run on already-bound listeners until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(
        &self,
        listener: TcpListener,
        ws_listener: Option<TcpListener>,
        world: World,
    ) -> Result<(), GameServerError> {
        info!(addr = %listener.local_addr()?, version = %self.config.version, "Game server listening");
        if let Some(ws) = &ws_listener {
            info!(addr = %ws.local_addr()?, "WebSocket listener enabled");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(1024);

        let world_handle = tokio::spawn(run_world_loop(
            world,
            inbound_rx,
            self.config.tick_duration(),
            self.shutdown_tx.subscribe(),
        ));

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        if let Some(id) = self.admit(addr).await {
                            self.handle_tcp(id, stream, addr, inbound_tx.clone());
                        }
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                result = accept_optional(&ws_listener) => match result {
                    Ok((stream, addr)) => {
                        if let Some(id) = self.admit(addr).await {
                            self.handle_ws(id, stream, addr, inbound_tx.clone());
                        }
                    }
                    Err(e) => error!("WebSocket accept error: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(inbound_tx);
        match world_handle.await {
            Ok(world) => {
                info!(tick = world.tick(), "World stopped");
                Ok(())
            }
            Err(e) => Err(GameServerError::Internal(format!("world task failed: {e}"))),
        }
    }

    /// Reserve a client slot for `addr`, or refuse at the limit.
    async fn admit(&self, addr: SocketAddr) -> Option<ConnectionId> {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.config.max_connections {
            warn!("Connection limit reached, rejecting {}", addr);
            return None;
        }
        let id = Uuid::new_v4();
        clients.insert(id, addr);
        info!("New connection from {}", addr);
        Some(id)
    }

    /// Handle a raw TCP connection.
    fn handle_tcp(&self, id: ConnectionId, stream: TcpStream, addr: SocketAddr, inbound: mpsc::Sender<Inbound>) {
        let clients = self.clients.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let Some(msg_rx) = open_connection(id, &clients, &inbound, addr).await else {
                return;
            };

            let (mut reader, writer) = stream.into_split();
            tokio::spawn(write_tcp(writer, msg_rx, addr));

            let mut decoder = FrameDecoder::new(config.max_frame);
            let mut buf = vec![0u8; 4096];
            let mut stopping = false;

            loop {
                let read = tokio::select! {
                    read = read_chunk(&mut reader, &mut buf, config.idle_timeout) => read,
                    _ = shutdown_rx.recv() => {
                        stopping = true;
                        break;
                    }
                };

                let n = match read {
                    Ok(0) => {
                        debug!("Client {} disconnected", addr);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                        info!("Client {} idle, closing", addr);
                        break;
                    }
                    Err(e) => {
                        debug!("Read error for {}: {}", addr, e);
                        break;
                    }
                };

                decoder.feed(&buf[..n]);
                if !forward_frames(id, &mut decoder, &inbound, &buf[..n]).await {
                    break;
                }
            }

            close_connection(&clients, &inbound, id, stopping).await;
        });
    }

    /// Handle a WebSocket connection. Each binary frame carries MessagePack;
    /// text frames are accepted as JSON.
    fn handle_ws(&self, id: ConnectionId, stream: TcpStream, addr: SocketAddr, inbound: mpsc::Sender<Inbound>) {
        let clients = self.clients.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    clients.write().await.remove(&id);
                    return;
                }
            };

            let Some(mut msg_rx) = open_connection(id, &clients, &inbound, addr).await else {
                return;
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let bytes = match encode(&msg) {
                        Ok(b) => b,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
            });

            let mut decoder = FrameDecoder::new(config.max_frame);
            let mut stopping = false;

            loop {
                let next = tokio::select! {
                    next = next_ws(&mut ws_receiver, config.idle_timeout) => next,
                    _ = shutdown_rx.recv() => {
                        stopping = true;
                        break;
                    }
                };

                match next {
                    Ok(Some(Ok(Message::Binary(data)))) => {
                        decoder.feed(&data);
                        if !forward_frames(id, &mut decoder, &inbound, &data).await {
                            break;
                        }
                    }
                    Ok(Some(Ok(Message::Text(text)))) => {
                        let inbound_msg = match serde_json::from_str(&text) {
                            Ok(value) => Inbound::Message { id, value },
                            Err(e) => Inbound::Malformed { id, reason: format!("malformed frame: {e}") },
                        };
                        if inbound.send(inbound_msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        debug!("Client {} disconnected", addr);
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        error!("WebSocket error for {}: {}", addr, e);
                        break;
                    }
                    Ok(Some(Ok(_))) => {}
                    Err(_) => {
                        info!("Client {} idle, closing", addr);
                        break;
                    }
                }
            }

            close_connection(&clients, &inbound, id, stopping).await;
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

// =============================================================================
// CONNECTION PLUMBING
// =============================================================================

async fn accept_optional(listener: &Option<TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn open_connection(
    id: ConnectionId,
    clients: &ClientMap,
    inbound: &mpsc::Sender<Inbound>,
    addr: SocketAddr,
) -> Option<mpsc::Receiver<ServerMessage>> {
    let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(64);

    if inbound.send(Inbound::Opened { id, addr, sender: msg_tx }).await.is_err() {
        clients.write().await.remove(&id);
        return None;
    }
    Some(msg_rx)
}

/// Release the client slot. On shutdown the world task closes the session
/// itself, after sending its farewell.
async fn close_connection(clients: &ClientMap, inbound: &mpsc::Sender<Inbound>, id: ConnectionId, stopping: bool) {
    if !stopping {
        let _ = inbound.send(Inbound::Closed { id }).await;
    }
    clients.write().await.remove(&id);
}

/// Drain complete frames into the world task. Returns false once the world
/// task is gone.
async fn forward_frames(
    id: ConnectionId,
    decoder: &mut FrameDecoder,
    inbound: &mpsc::Sender<Inbound>,
    chunk: &[u8],
) -> bool {
    loop {
        let msg = match decoder.next_value() {
            Ok(Some(value)) => Inbound::Message { id, value },
            Ok(None) => return true,
            Err(e) => {
                debug!(connection = %id, bytes = %hex::encode(&chunk[..chunk.len().min(32)]), "Bad frame: {}", e);
                Inbound::Malformed { id, reason: e.to_string() }
            }
        };
        if inbound.send(msg).await.is_err() {
            return false;
        }
    }
}

async fn read_chunk(reader: &mut OwnedReadHalf, buf: &mut [u8], idle: Option<Duration>) -> io::Result<usize> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, reader.read(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))?,
        None => reader.read(buf).await,
    }
}

async fn next_ws<S>(receiver: &mut S, idle: Option<Duration>) -> Result<Option<S::Item>, tokio::time::error::Elapsed>
where
    S: Stream + Unpin,
{
    match idle {
        Some(limit) => tokio::time::timeout(limit, receiver.next()).await,
        None => Ok(receiver.next().await),
    }
}

async fn write_tcp(mut writer: OwnedWriteHalf, mut msg_rx: mpsc::Receiver<ServerMessage>, addr: SocketAddr) {
    while let Some(msg) = msg_rx.recv().await {
        let bytes = match encode(&msg) {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            debug!("Write error for {}: {}", addr, e);
            break;
        }
    }
}

// =============================================================================
// WORLD TASK
// =============================================================================

/// Own the world: apply commands as they arrive and tick on a fixed interval.
async fn run_world_loop(
    mut world: World,
    mut inbound: mpsc::Receiver<Inbound>,
    tick_duration: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> World {
    let mut sessions = SessionManager::new();
    let mut tick_interval = interval(tick_duration);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick);
                last_tick = now;

                let result = world.update(dt);
                for event in &result.events {
                    log_event(event);
                }
            }
            msg = inbound.recv() => match msg {
                Some(Inbound::Opened { id, addr, sender }) => sessions.open(id, addr, sender),
                Some(Inbound::Message { id, value }) => sessions.dispatch(id, &mut world, value),
                Some(Inbound::Malformed { id, reason }) => sessions.reply(id, ServerMessage::Err(reason)),
                Some(Inbound::Closed { id }) => {
                    sessions.close(id, &mut world);
                }
                None => break,
            },
            _ = shutdown_rx.recv() => break,
        }
    }

    sessions.close_all(&mut world, SHUTDOWN_NOTICE);
    world
}

fn log_event(event: &GameEvent) {
    match &event.data {
        GameEventData::PlayerJoined { slot, name, resumed } => {
            info!(tick = event.tick, %slot, %name, resumed, "Player joined");
        }
        GameEventData::PlayerLeft { slot, name, score } => {
            info!(tick = event.tick, %slot, %name, score, "Player left");
        }
        GameEventData::BombSpent { device, owner, points } => {
            info!(tick = event.tick, device, %owner, points, "Bomb spent");
        }
        other => debug!(tick = event.tick, slot = ?event.slot(), event = ?other, "Game event"),
    }
}
