//! WebSocket link from a peer agent to the relay.
//!
//! [`RelayConnection::connect`] dials the relay and sends the `Connect`
//! frame.  [`RelayConnection::run`] then pumps frames both ways until the
//! link drops or the token is cancelled:
//!
//! - inbound binary frames are decoded and handed to the agent as
//!   [`AgentEvent::Relay`];
//! - messages from the agent's outgoing queue are encoded and written.
//!
//! The relay pings every few seconds and tungstenite answers automatically,
//! so any frame at all (data or ping) proves the relay is alive.  If nothing
//! arrives within `read_timeout` the link is considered dead.  Every outbound
//! write is bounded by `write_timeout` the same way.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kvm_mesh_core::protocol::messages::ConnectMessage;
use kvm_mesh_core::{decode_frame, encode_frame, ProtocolError, RelayMessage};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::handle_focus::AgentEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors on the relay link.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The relay could not be reached.
    #[error("failed to connect to relay at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: WsError,
    },

    /// The `Connect` frame could not be delivered.
    #[error("relay handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// The relay closed the link or stopped answering.
    #[error("relay connection closed")]
    Closed,
}

/// An established, registered link to the relay.
pub struct RelayConnection {
    ws: WsStream,
    addr: SocketAddr,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RelayConnection {
    /// Dials `addr` and registers this peer with `hello`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Connect`] if the WebSocket upgrade fails and
    /// [`ConnectionError::Handshake`] if the `Connect` frame cannot be sent
    /// within `write_timeout`.
    pub async fn connect(
        addr: SocketAddr,
        hello: ConnectMessage,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let (mut ws, _) = connect_async(format!("ws://{addr}"))
            .await
            .map_err(|source| ConnectionError::Connect { addr, source })?;

        let frame = encode_frame(&RelayMessage::Connect(hello))?;
        timeout(write_timeout, ws.send(WsMessage::Binary(frame)))
            .await
            .map_err(|_| {
                ConnectionError::Handshake(format!("timed out after {write_timeout:?}"))
            })?
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        info!("connected to relay at {addr}");
        Ok(Self {
            ws,
            addr,
            read_timeout,
            write_timeout,
        })
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Pumps frames until the link drops, the agent goes away or `cancel`
    /// fires.
    ///
    /// Returns `Ok(())` on a clean stop (cancellation, the agent hanging up,
    /// or a close frame from the relay).
    pub async fn run(
        mut self,
        inbound: mpsc::Sender<AgentEvent>,
        mut outgoing: mpsc::UnboundedReceiver<RelayMessage>,
        cancel: CancellationToken,
    ) -> Result<(), ConnectionError> {
        let mut deadline = Instant::now() + self.read_timeout;
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),

                frame = timeout_at(deadline, self.ws.next()) => {
                    let frame = match frame {
                        Ok(frame) => {
                            deadline = Instant::now() + self.read_timeout;
                            frame
                        }
                        Err(_) => {
                            warn!("relay silent for {:?}; dropping link", self.read_timeout);
                            break Err(ConnectionError::Closed);
                        }
                    };
                    match frame {
                        None | Some(Ok(WsMessage::Close(_))) => break Ok(()),
                        Some(Err(e)) => break Err(e.into()),
                        Some(Ok(WsMessage::Binary(bytes))) => match decode_frame(&bytes) {
                            Ok(message) => {
                                if inbound.send(AgentEvent::Relay(message)).await.is_err() {
                                    break Ok(());
                                }
                            }
                            Err(e) => debug!("dropping malformed relay frame: {e}"),
                        },
                        Some(Ok(_)) => {}
                    }
                }

                message = outgoing.recv() => {
                    let Some(message) = message else { break Ok(()) };
                    let frame = encode_frame(&message)?;
                    let sent = timeout(self.write_timeout, self.ws.send(WsMessage::Binary(frame)));
                    match sent.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => break Err(e.into()),
                        Err(_) => {
                            warn!("write to relay timed out after {:?}", self.write_timeout);
                            break Err(ConnectionError::Closed);
                        }
                    }
                }
            }
        };

        let _ = timeout(self.write_timeout, self.ws.close(None)).await;
        debug!("relay link to {} closed", self.addr);
        result
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use kvm_mesh_core::{DisplayBounds, InputEvent};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use uuid::Uuid;

    use super::*;

    const WRITE: Duration = Duration::from_secs(5);

    fn hello() -> ConnectMessage {
        ConnectMessage {
            hostname: "test".to_string(),
            peer_id: Uuid::new_v4(),
            displays: vec![DisplayBounds::new(0, 0, 1920, 1080)],
        }
    }

    /// Accepts one WebSocket connection on a loopback port.
    async fn fake_relay() -> (SocketAddr, tokio::task::JoinHandle<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });
        (addr, handle)
    }

    async fn next_message(ws: &mut WebSocketStream<TcpStream>) -> RelayMessage {
        loop {
            if let WsMessage::Binary(bytes) = ws.next().await.unwrap().unwrap() {
                return decode_frame(&bytes).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_connect_sends_connect_frame_first() {
        // Arrange
        let (addr, relay) = fake_relay().await;
        let hello = hello();

        // Act
        let _conn = RelayConnection::connect(addr, hello.clone(), Duration::from_secs(5), WRITE)
            .await
            .unwrap();
        let mut server = relay.await.unwrap();

        // Assert
        assert_eq!(next_message(&mut server).await, RelayMessage::Connect(hello));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = RelayConnection::connect(addr, hello(), Duration::from_secs(5), WRITE).await;

        assert!(matches!(result, Err(ConnectionError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_run_pumps_frames_both_ways() {
        // Arrange
        let (addr, relay) = fake_relay().await;
        let conn = RelayConnection::connect(addr, hello(), Duration::from_secs(5), WRITE)
            .await
            .unwrap();
        let mut server = relay.await.unwrap();
        next_message(&mut server).await;
        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(conn.run(inbound_tx, outgoing_rx, cancel.clone()));

        // Act
        let key = InputEvent::new(1, 30, 1);
        outgoing_tx.send(RelayMessage::InputEvent(key)).unwrap();
        let relayed = next_message(&mut server).await;
        server
            .send(WsMessage::Binary(encode_frame(&RelayMessage::ReleaseFocus).unwrap()))
            .await
            .unwrap();
        let received = inbound_rx.recv().await.unwrap();

        // Assert
        assert_eq!(relayed, RelayMessage::InputEvent(key));
        assert_eq!(received, AgentEvent::Relay(RelayMessage::ReleaseFocus));
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_silent_relay_times_out() {
        let (addr, relay) = fake_relay().await;
        let conn = RelayConnection::connect(addr, hello(), Duration::from_millis(100), WRITE)
            .await
            .unwrap();
        let _server = relay.await.unwrap();
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let (_outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let result = conn
            .run(inbound_tx, outgoing_rx, CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_stalled_relay_write_times_out() {
        // Arrange: the relay accepts but never reads, so its buffers fill up.
        let (addr, relay) = fake_relay().await;
        let conn = RelayConnection::connect(
            addr,
            hello(),
            Duration::from_secs(60),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        let _server = relay.await.unwrap();
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let key = RelayMessage::InputEvent(InputEvent::new(1, 30, 1));
            while outgoing_tx.send(key.clone()).is_ok() {
                tokio::task::yield_now().await;
            }
        });

        // Act
        let result = tokio::time::timeout(
            Duration::from_secs(30),
            conn.run(inbound_tx, outgoing_rx, CancellationToken::new()),
        )
        .await
        .expect("write deadline should end the link");

        // Assert
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }
}
