//! UDP multicast discovery and relay election.
//!
//! Each peer joins the configured multicast group and runs the
//! [`Election`] state machine against it:
//!
//! 1. A **driver** task ticks the election once per poll interval and sends
//!    whatever datagram it asks for to the group.
//! 2. A **listener** task receives datagrams from the group, decodes them and
//!    hands them to the driver.
//!
//! The first decision is delivered through a `oneshot` channel.  A peer that
//! found a relay stops both tasks.  A peer that elected itself keeps them
//! running so it can answer later queries with `ServerAnnounce`, until its
//! cancellation token fires.
//!
//! # How multicast discovery works (for beginners)
//!
//! A multicast group is a class-D IP address (here `239.2.3.239`) that any
//! number of hosts can subscribe to.  A datagram sent to the group is
//! delivered to every subscriber on the LAN, including the sender itself
//! when loopback is enabled.  That is why the election ignores queries
//! carrying its own start time.
//!
//! # Cancellation
//!
//! Both tasks wait inside `tokio::select!` against the token, so a pending
//! `recv_from` never holds up shutdown.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::Duration;

use kvm_mesh_core::protocol::MAX_DATAGRAM_SIZE;
use kvm_mesh_core::{
    decode_datagram, encode_datagram, DiscoveryMessage, Election, ElectionAction, ElectionConfig,
    ElectionOutcome,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type for discovery start-up.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The configured group address is not a multicast address.
    #[error("{0} is not an IPv4 multicast address")]
    InvalidAddress(SocketAddrV4),

    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The socket could not subscribe to the group.
    #[error("failed to join multicast group {group}: {source}")]
    JoinFailed {
        group: Ipv4Addr,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything one discovery run needs.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub group: SocketAddrV4,
    pub poll_interval: Duration,
    pub election: ElectionConfig,
}

/// A bound discovery socket, ready to run an election.
pub struct DiscoveryService {
    socket: Arc<UdpSocket>,
    settings: DiscoverySettings,
}

impl DiscoveryService {
    /// Binds the group port on all interfaces and joins the group.
    ///
    /// # Errors
    ///
    /// Any failure here is a start-up error and is returned to the caller
    /// unchanged; nothing is retried.
    pub fn bind(settings: DiscoverySettings) -> Result<Self, DiscoveryError> {
        let group = settings.group;
        if !group.ip().is_multicast() {
            return Err(DiscoveryError::InvalidAddress(group));
        }

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port()));
        let socket =
            StdUdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        socket
            .join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)
            .map_err(|source| DiscoveryError::JoinFailed {
                group: *group.ip(),
                source,
            })?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_nonblocking(true)?;

        info!("discovery listening on {addr}, group {group}");
        Ok(Self {
            socket: Arc::new(UdpSocket::from_std(socket)?),
            settings,
        })
    }

    /// Starts the listener and driver tasks.
    ///
    /// The returned receiver yields the election outcome once.  It errors
    /// only if `cancel` fired before a decision was reached.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (oneshot::Receiver<ElectionOutcome>, JoinHandle<()>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let stop = cancel.child_token();

        let listener = tokio::spawn(listen(Arc::clone(&self.socket), inbound_tx, stop.clone()));
        let handle = tokio::spawn(async move {
            drive(self.socket, self.settings, inbound_rx, outcome_tx, stop.clone()).await;
            stop.cancel();
            let _ = listener.await;
            debug!("discovery stopped");
        });

        (outcome_rx, handle)
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn listen(
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<(DiscoveryMessage, SocketAddr)>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("discovery recv error: {e}");
                    continue;
                }
            },
        };

        match decode_datagram(&buf[..len]) {
            Ok(message) => {
                if inbound.send((message, from)).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!("dropping malformed discovery datagram from {from}: {e}"),
        }
    }
}

async fn drive(
    socket: Arc<UdpSocket>,
    settings: DiscoverySettings,
    mut inbound: mpsc::Receiver<(DiscoveryMessage, SocketAddr)>,
    outcome_tx: oneshot::Sender<ElectionOutcome>,
    cancel: CancellationToken,
) {
    let group = SocketAddr::V4(settings.group);
    let mut election = Election::new(settings.election);
    let mut outcome_tx = Some(outcome_tx);
    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let action = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => election.on_tick(),
            received = inbound.recv() => match received {
                Some((message, from)) => election.on_message(&message, from),
                None => break,
            },
        };

        match action {
            Some(ElectionAction::Broadcast(message)) => send(&socket, &message, group).await,
            Some(ElectionAction::Decided(outcome)) => {
                if let Some(tx) = outcome_tx.take() {
                    let _ = tx.send(outcome);
                }
                if let ElectionOutcome::Peer(_) = outcome {
                    break;
                }
            }
            None => {}
        }
    }
}

/// Sends one datagram; failures are logged and polling carries on.
async fn send(socket: &UdpSocket, message: &DiscoveryMessage, to: SocketAddr) {
    let bytes = match encode_datagram(message) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to encode discovery datagram: {e}");
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, to).await {
        warn!("discovery send to {to} failed: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
