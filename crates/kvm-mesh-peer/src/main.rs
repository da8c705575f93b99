//! KVM-Mesh peer entry point.
//!
//! Loads configuration, then loops between discovery and a relay session
//! until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()                 -- TOML + CLI overrides
//!  └─ loop
//!       ├─ discover()               -- multicast election
//!       │    └─ Server → start_relay() once, keep answering queries
//!       └─ run_session()            -- until the relay link drops
//!            ├─ RelayConnection::run()
//!            ├─ PeerAgent::run()
//!            ├─ watch_zones()
//!            └─ pump_local_input()
//! ```
//!
//! A peer that won the election keeps its relay for the life of the process
//! and simply reconnects to it on loopback.  A peer that joined someone
//! else's relay runs discovery again whenever its link drops.
//!
//! # Platform adapters
//!
//! The `MockInputDevice` and `MockDisplayServer` wired here record input and
//! report a single 1080p monitor.  A platform build swaps them for real
//! backends (evdev/uinput, XTest, ...) behind the same traits.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use kvm_mesh_core::protocol::messages::ConnectMessage;
use kvm_mesh_core::{ElectionConfig, ElectionOutcome, EmergencyReleaseDetector};
use kvm_mesh_peer::application::handle_focus::PeerAgent;
use kvm_mesh_peer::application::watch_zones::watch_zones;
use kvm_mesh_peer::infrastructure::display::mock::MockDisplayServer;
use kvm_mesh_peer::infrastructure::display::DisplayServer;
use kvm_mesh_peer::infrastructure::input_device::mock::MockInputDevice;
use kvm_mesh_peer::infrastructure::input_device::{pump_local_input, InputDevice};
use kvm_mesh_peer::infrastructure::network::connection::RelayConnection;
use kvm_mesh_peer::infrastructure::network::discovery::{DiscoveryService, DiscoverySettings};
use kvm_mesh_peer::infrastructure::storage::config::{load_config, AppConfig};
use kvm_mesh_relay::{RelayConfig, RelayServer};

/// Capacity of the agent's event queue.
const AGENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "kvm-mesh-peer", version, about = "Share one keyboard and mouse across a LAN")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "KVM_MESH_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Overrides `discovery.cluster_id`.
    #[arg(long, env = "KVM_MESH_CLUSTER_ID")]
    cluster_id: Option<String>,
}

/// Adapters and identity shared by every session.
struct Peer {
    id: Uuid,
    hostname: String,
    device: Arc<dyn InputDevice>,
    display: Arc<dyn DisplayServer>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(cluster_id) = cli.cluster_id {
        config.discovery.cluster_id = cluster_id;
        config.validate().context("invalid --cluster-id")?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.app.log_level)),
        )
        .init();

    let display = Arc::new(MockDisplayServer::single_1080p());
    let peer = Peer {
        id: Uuid::new_v4(),
        hostname: local_hostname(),
        device: Arc::new(MockInputDevice::attached_to(Arc::clone(&display))),
        display,
    };
    let start_time_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    info!(peer_id = %peer.id, hostname = %peer.hostname, "KVM-Mesh peer starting");

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    // ── Discovery / session loop ──────────────────────────────────────────────
    let mut local_relay: Option<SocketAddr> = None;
    while !cancel.is_cancelled() {
        let relay_addr = match local_relay {
            Some(addr) => addr,
            None => match discover(&config, start_time_millis, &cancel).await? {
                Some(ElectionOutcome::Peer(addr)) => addr,
                Some(ElectionOutcome::Server) => {
                    let addr = start_relay(&config, &cancel).await?;
                    local_relay = Some(addr);
                    addr
                }
                None => break,
            },
        };

        match run_session(&peer, &config, relay_addr, &cancel).await {
            Ok(()) => info!("relay session ended"),
            Err(e) => warn!("relay session failed: {e:#}"),
        }

        // Back off briefly before reconnecting or re-running discovery.
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(config.discovery_interval()) => {}
        }
    }

    if let Err(e) = peer.device.release() {
        warn!("failed to release input devices on exit: {e}");
    }
    info!("KVM-Mesh peer stopped");
    Ok(())
}

/// Runs one election.  Returns `None` if cancelled first.
async fn discover(
    config: &AppConfig,
    start_time_millis: i64,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<ElectionOutcome>> {
    let settings = DiscoverySettings {
        group: config.multicast_group()?,
        poll_interval: config.discovery_interval(),
        election: ElectionConfig {
            api_version: config.discovery.api_version,
            cluster_id: config.discovery.cluster_id.clone(),
            poll_limit: config.discovery.poll_count,
            server_port: config.relay.port,
            start_time_millis,
        },
    };
    let service = DiscoveryService::bind(settings).context("starting discovery")?;

    // An elected peer's service keeps answering queries until shutdown.
    let (outcome, _service) = service.spawn(cancel.clone());
    Ok(outcome.await.ok())
}

/// Binds the relay on the configured port and returns its loopback address.
async fn start_relay(config: &AppConfig, cancel: &CancellationToken) -> anyhow::Result<SocketAddr> {
    let relay_config = RelayConfig {
        bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.relay.port)),
        ping_interval: Duration::from_secs(config.relay.ping_interval_seconds),
        pong_wait: Duration::from_secs(config.relay.pong_wait_seconds),
        write_wait: Duration::from_secs(config.relay.write_wait_seconds),
    };
    let server = RelayServer::bind(relay_config)
        .await
        .context("starting relay")?;
    let port = server.local_addr()?.port();

    let relay_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = server.run(relay_cancel).await {
            error!("relay stopped: {e}");
        }
    });

    info!("this peer is the relay (port {port})");
    Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
}

/// Connects to the relay and runs the agent until the link drops.
async fn run_session(
    peer: &Peer,
    config: &AppConfig,
    relay_addr: SocketAddr,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let hello = ConnectMessage {
        hostname: peer.hostname.clone(),
        peer_id: peer.id,
        displays: peer.display.displays().context("enumerating displays")?,
    };
    let connection = RelayConnection::connect(
        relay_addr,
        hello,
        Duration::from_secs(config.relay.pong_wait_seconds),
        Duration::from_secs(config.relay.write_wait_seconds),
    )
    .await?;
    info!(relay = %connection.relay_addr(), "session started");

    let session = cancel.child_token();
    let agent = PeerAgent::new(
        Arc::clone(&peer.device),
        Arc::clone(&peer.display),
        EmergencyReleaseDetector::new(config.escape_sequence.key_count, config.escape_window()),
    );
    let zones = agent.zones();
    let warps = agent.cursor_warps();
    let (events_tx, events_rx) = mpsc::channel(AGENT_QUEUE_CAPACITY);
    let (relay_tx, relay_rx) = mpsc::unbounded_channel();

    let pump = pump_local_input(Arc::clone(&peer.device), events_tx.clone(), session.clone());
    let watcher = tokio::spawn(watch_zones(
        Arc::clone(&peer.display),
        zones,
        warps,
        events_tx.clone(),
        config.transition_poll(),
        session.clone(),
    ));
    let agent = tokio::spawn(agent.run(events_rx, relay_tx, session.clone()));

    let result = connection.run(events_tx, relay_rx, session.clone()).await;

    session.cancel();
    let _ = tokio::join!(pump, watcher, agent);
    result.context("relay link")
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "kvm-mesh-peer".to_string())
}
