//! WebSocket relay server: accept loop, per-connection tasks and the
//! coordinator actor.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket.
//! 3. Waiting for the peer's `Connect` frame.  Anything else that arrives
//!    first is dropped; a malformed frame or invalid display geometry at this
//!    stage closes the connection.
//! 4. Running two tasks per connection:
//!    - **Reader**: decodes binary frames and submits them to the actor.
//!      Every read is bounded by `pong_wait`, so a silent peer is treated as
//!      disconnected.
//!    - **Writer**: drains the peer's outbound queue and sends a WebSocket
//!      ping every `ping_interval`.  Every write is bounded by `write_wait`.
//! 5. Running one **actor** task that owns the [`FocusCoordinator`] and the
//!    [`PeerSessions`] registry.  It is the only place relay state changes.
//!
//! # Why an actor? (for beginners)
//!
//! Many connections are read concurrently, but focus ownership must change
//! in one well-defined order.  Instead of wrapping the state in a `Mutex`,
//! the connection tasks send commands over an `mpsc` channel to one task
//! that processes them one at a time.  Outbound messages go into per-peer
//! unbounded queues, so a peer with a slow network never stalls the actor or
//! the other peers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use kvm_mesh_core::protocol::messages::ConnectMessage;
use kvm_mesh_core::protocol::MAX_FRAME_SIZE;
use kvm_mesh_core::{decode_frame, encode_frame, PeerId, ProtocolError, RelayMessage};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::manage_peers::PeerSessions;
use crate::application::route_focus::{FocusCoordinator, Outbound};

/// Capacity of the connection → actor command queue.
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Error type for relay server operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The TCP listener could not be bound.
    #[error("failed to bind relay listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timed out: {0}")]
    Timeout(String),

    /// The coordinator actor exited while the relay was still accepting.
    #[error("relay actor stopped unexpectedly")]
    ActorStopped,
}

/// Listener address and liveness timings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// Period between WebSocket pings.
    pub ping_interval: Duration,
    /// Longest silence tolerated from a peer before it is dropped.
    pub pong_wait: Duration,
    /// Longest a single outbound write (or the handshake) may take.
    pub write_wait: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4283)),
            ping_interval: Duration::from_secs(9),
            pong_wait: Duration::from_secs(10),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Frames queued for one peer's writer task.
type Outbox = mpsc::UnboundedSender<Vec<u8>>;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Work submitted to the actor by connection tasks.
#[derive(Debug)]
enum RelayCommand {
    Connected {
        conn_gen: u64,
        connect: ConnectMessage,
        outbox: Outbox,
    },
    Message {
        peer_id: PeerId,
        conn_gen: u64,
        message: RelayMessage,
    },
    Disconnected {
        peer_id: PeerId,
        conn_gen: u64,
    },
}

/// A bound, not yet running, relay.
pub struct RelayServer {
    listener: TcpListener,
    config: RelayConfig,
}

impl RelayServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BindFailed`] if the address is in use or not
    /// permitted.  Callers treat this as fatal.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| RelayError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        info!("relay listening on {}", config.bind_addr);
        Ok(Self { listener, config })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `cancel` fires.
    ///
    /// # Errors
    ///
    /// [`RelayError::ActorStopped`] if the actor exits or panics before
    /// `cancel` fires.  Every open connection is closed first.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RelayError> {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let stop = cancel.child_token();
        let mut actor = tokio::spawn(run_actor(command_rx, stop.clone()));
        let config = Arc::new(self.config);
        let mut next_gen: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("relay shutting down");
                    break;
                }
                finished = &mut actor => {
                    match finished {
                        Ok(()) => error!("relay actor exited while still accepting"),
                        Err(e) => error!("relay actor task failed: {e}"),
                    }
                    stop.cancel();
                    return Err(RelayError::ActorStopped);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        next_gen += 1;
                        debug!("connection #{next_gen} from {addr}");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            next_gen,
                            Arc::clone(&config),
                            commands.clone(),
                            stop.child_token(),
                        ));
                    }
                    // Transient (e.g. too many open files); keep serving.
                    Err(e) => error!("accept error: {e}"),
                },
            }
        }

        drop(commands);
        if let Err(e) = actor.await {
            error!("relay actor task failed: {e}");
        }
        Ok(())
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

async fn run_actor(mut commands: mpsc::Receiver<RelayCommand>, cancel: CancellationToken) {
    let mut coordinator = FocusCoordinator::new();
    let mut sessions: PeerSessions<Outbox> = PeerSessions::new();

    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(c) => c,
                None => break,
            },
        };

        let outbound = match command {
            RelayCommand::Connected {
                conn_gen,
                connect,
                outbox,
            } => {
                if let Some(old) =
                    sessions.register(connect.peer_id, &connect.hostname, conn_gen, outbox)
                {
                    info!(
                        "peer {} ({}) superseded connection #{} (open {:?}) with #{conn_gen}",
                        old.peer_id,
                        old.hostname,
                        old.conn_gen,
                        old.connected_at.elapsed()
                    );
                }
                coordinator.handle_connect(connect)
            }
            RelayCommand::Message {
                peer_id,
                conn_gen,
                message,
            } => {
                if !sessions.is_current(peer_id, conn_gen) {
                    debug!("dropping message from stale connection #{conn_gen} of {peer_id}");
                    continue;
                }
                coordinator.handle_message(peer_id, message)
            }
            RelayCommand::Disconnected { peer_id, conn_gen } => {
                if sessions.remove_if_current(peer_id, conn_gen).is_none() {
                    continue;
                }
                coordinator.handle_disconnect(peer_id)
            }
        };

        deliver(&sessions, outbound);
    }

    debug!("relay actor stopped; closing {} session(s)", sessions.len());
    sessions.drain().for_each(drop);
}

fn deliver(sessions: &PeerSessions<Outbox>, outbound: Vec<Outbound>) {
    for Outbound { to, message } in outbound {
        let Some(session) = sessions.get(to) else {
            continue;
        };
        match encode_frame(&message) {
            Ok(bytes) => {
                if session.handle.send(bytes).is_err() {
                    debug!("outbound queue for {to} already closed");
                }
            }
            Err(e) => error!("failed to encode {:?} for {to}: {e}", message.message_type()),
        }
    }
}

// ── Per-connection tasks ──────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_gen: u64,
    config: Arc<RelayConfig>,
    commands: mpsc::Sender<RelayCommand>,
    cancel: CancellationToken,
) {
    match run_connection(stream, addr, conn_gen, config, commands, cancel).await {
        Ok(()) => debug!("connection #{conn_gen} from {addr} closed"),
        Err(e) => warn!("connection #{conn_gen} from {addr} closed with error: {e}"),
    }
}

async fn run_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_gen: u64,
    config: Arc<RelayConfig>,
    commands: mpsc::Sender<RelayCommand>,
    cancel: CancellationToken,
) -> Result<(), RelayError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_FRAME_SIZE);
    ws_config.max_frame_size = Some(MAX_FRAME_SIZE);

    let ws = timeout(
        config.write_wait,
        accept_async_with_config(stream, Some(ws_config)),
    )
    .await
    .map_err(|_| RelayError::Timeout(format!("websocket handshake with {addr}")))??;
    let (sink, mut source) = ws.split();

    let Some(connect) = await_connect(&mut source, addr, &config, &cancel).await? else {
        return Ok(());
    };
    let peer_id = connect.peer_id;

    let (outbox, outbox_rx) = mpsc::unbounded_channel();
    let registered = commands
        .send(RelayCommand::Connected {
            conn_gen,
            connect,
            outbox,
        })
        .await;
    if registered.is_err() {
        return Ok(());
    }

    let writer = tokio::spawn(write_loop(sink, outbox_rx, Arc::clone(&config), cancel.clone()));
    let result = read_loop(&mut source, peer_id, conn_gen, &config, &commands, &cancel).await;

    cancel.cancel();
    let _ = commands
        .send(RelayCommand::Disconnected { peer_id, conn_gen })
        .await;
    if let Err(e) = writer.await {
        error!("writer task for {peer_id} failed: {e}");
    }
    result
}

/// Reads until the peer's `Connect` arrives.
///
/// Returns `Ok(None)` if the peer closed first or the relay is shutting down.
async fn await_connect(
    source: &mut WsSource,
    addr: SocketAddr,
    config: &RelayConfig,
    cancel: &CancellationToken,
) -> Result<Option<ConnectMessage>, RelayError> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            frame = timeout(config.pong_wait, source.next()) => frame
                .map_err(|_| RelayError::Timeout(format!("no Connect from {addr}")))?,
        };

        match frame {
            None | Some(Ok(WsMessage::Close(_))) => return Ok(None),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(WsMessage::Binary(bytes))) => match decode_frame(&bytes)? {
                RelayMessage::Connect(connect) => {
                    connect.validate()?;
                    return Ok(Some(connect));
                }
                other => warn!(
                    "dropping {:?} from {addr}: no Connect yet",
                    other.message_type()
                ),
            },
            Some(Ok(_)) => {}
        }
    }
}

async fn read_loop(
    source: &mut WsSource,
    peer_id: PeerId,
    conn_gen: u64,
    config: &RelayConfig,
    commands: &mpsc::Sender<RelayCommand>,
    cancel: &CancellationToken,
) -> Result<(), RelayError> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = timeout(config.pong_wait, source.next()) => frame.map_err(|_| {
                RelayError::Timeout(format!("peer {peer_id} silent for {:?}", config.pong_wait))
            })?,
        };

        match frame {
            None | Some(Ok(WsMessage::Close(_))) => return Ok(()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(WsMessage::Binary(bytes))) => match decode_frame(&bytes) {
                Ok(message) => {
                    if let RelayMessage::Connect(connect) = &message {
                        if let Err(e) = connect.validate() {
                            warn!("dropping Connect from {peer_id}: {e}");
                            continue;
                        }
                    }
                    let submitted = commands
                        .send(RelayCommand::Message {
                            peer_id,
                            conn_gen,
                            message,
                        })
                        .await;
                    if submitted.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => warn!("malformed frame from {peer_id}: {e}"),
            },
            // Ping, pong and text frames only refresh the read deadline.
            Some(Ok(_)) => {}
        }
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut outbox: mpsc::UnboundedReceiver<Vec<u8>>,
    config: Arc<RelayConfig>,
    cancel: CancellationToken,
) {
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ping.tick() => WsMessage::Ping(Vec::new()),
            frame = outbox.recv() => match frame {
                Some(bytes) => WsMessage::Binary(bytes),
                // The actor dropped our queue: disconnected or superseded.
                None => break,
            },
        };

        match timeout(config.write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("write failed: {e}");
                break;
            }
            Err(_) => {
                warn!("write timed out after {:?}", config.write_wait);
                break;
            }
        }
    }

    cancel.cancel();
    let _ = timeout(config.write_wait, sink.close()).await;
}
