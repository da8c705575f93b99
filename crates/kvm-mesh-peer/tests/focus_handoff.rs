//! End-to-end focus handoff between two agents through a real relay.
//!
//! # Purpose
//!
//! Starts a [`RelayServer`] on loopback and two complete agent sessions
//! (connection, agent, cursor watch and input pump) backed by mock devices.
//! Peer A has a 1920×1080 display at (0,0) and peer B one at (1920,0).
//! Each mock device is attached to its display, so injected motion moves the
//! cursor the way a real pointer would.  The tests drive A's mock cursor and
//! keyboard and observe what B's virtual device receives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kvm_mesh_core::protocol::messages::{event_code, event_type, ConnectMessage};
use kvm_mesh_core::{DisplayBounds, EmergencyReleaseDetector, InputEvent, TransitionZone, Vector2};
use kvm_mesh_peer::application::handle_focus::PeerAgent;
use kvm_mesh_peer::application::watch_zones::watch_zones;
use kvm_mesh_peer::infrastructure::display::mock::MockDisplayServer;
use kvm_mesh_peer::infrastructure::display::DisplayServer;
use kvm_mesh_peer::infrastructure::input_device::mock::MockInputDevice;
use kvm_mesh_peer::infrastructure::input_device::pump_local_input;
use kvm_mesh_peer::infrastructure::network::connection::RelayConnection;
use kvm_mesh_relay::{RelayConfig, RelayServer};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ───────────────────────────────────────────────────────────────────

struct RunningPeer {
    device: Arc<MockInputDevice>,
    display: Arc<MockDisplayServer>,
    zones: watch::Receiver<Vec<TransitionZone>>,
}

async fn start_relay(cancel: &CancellationToken) -> SocketAddr {
    let server = RelayServer::bind(RelayConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..RelayConfig::default()
    })
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run(cancel.clone()));
    addr
}

/// Runs a full agent session for a peer with one display at `x`.
async fn start_peer(relay: SocketAddr, x: i32, cancel: &CancellationToken) -> RunningPeer {
    let screen = DisplayBounds::new(x, 0, 1920, 1080);
    let display = Arc::new(MockDisplayServer::new(vec![screen]));
    display.set_cursor(screen.center());
    let device = Arc::new(MockInputDevice::attached_to(display.clone()));
    let hello = ConnectMessage {
        hostname: format!("host-{x}"),
        peer_id: Uuid::new_v4(),
        displays: vec![screen],
    };
    let connection =
        RelayConnection::connect(relay, hello, Duration::from_secs(10), Duration::from_secs(10))
            .await
            .unwrap();

    let agent = PeerAgent::new(
        device.clone(),
        display.clone(),
        EmergencyReleaseDetector::new(3, Duration::from_secs(1)),
    );
    let zones = agent.zones();
    let warps = agent.cursor_warps();
    let (events_tx, events_rx) = mpsc::channel(64);
    let (relay_tx, relay_rx) = mpsc::unbounded_channel();

    pump_local_input(device.clone(), events_tx.clone(), cancel.clone());
    tokio::spawn(watch_zones(
        display.clone(),
        zones.clone(),
        warps,
        events_tx.clone(),
        Duration::from_millis(10),
        cancel.clone(),
    ));
    tokio::spawn(agent.run(events_rx, relay_tx, cancel.clone()));
    tokio::spawn(connection.run(events_tx, relay_rx, cancel.clone()));

    RunningPeer {
        device,
        display,
        zones,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Starts A then B and waits until A knows its zone towards B.
async fn two_peers(cancel: &CancellationToken) -> (RunningPeer, RunningPeer) {
    let relay = start_relay(cancel).await;
    let a = start_peer(relay, 0, cancel).await;
    let b = start_peer(relay, 1920, cancel).await;
    let zones = a.zones.clone();
    wait_until(move || zones.borrow().len() == 1).await;
    (a, b)
}

/// Moves A's cursor across its right edge.
async fn cross_right_edge(a: &RunningPeer) {
    a.display.set_cursor(Vector2::new(1900, 500));
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.display.set_cursor(Vector2::new(1919, 500));
}

fn key(code: u16, value: i32) -> InputEvent {
    InputEvent::new(event_type::EV_KEY, code, value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_peer_a_receives_zone_towards_peer_b() {
    // Arrange / Act
    let cancel = CancellationToken::new();
    let (a, _b) = two_peers(&cancel).await;

    // Assert
    let zones = a.zones.borrow().clone();
    assert_eq!(zones[0].bounds.left, 1919);
    assert_eq!(zones[0].target.bounds.left, 1920);
    cancel.cancel();
}

#[tokio::test]
async fn test_crossing_edge_hands_focus_and_forwards_keys() {
    // Arrange
    let cancel = CancellationToken::new();
    let (a, b) = two_peers(&cancel).await;

    // Act
    cross_right_edge(&a).await;
    let device_a = a.device.clone();
    wait_until(move || device_a.is_grabbed()).await;

    // B moves its cursor one pixel past its left edge zone.
    let device_b = b.device.clone();
    wait_until(move || !device_b.written().is_empty()).await;
    assert_eq!(
        b.device.written(),
        InputEvent::relative_motion(Vector2::new(1921 - 2880, 500 - 540)).to_vec()
    );
    assert_eq!(b.display.cursor_position().unwrap(), Vector2::new(1921, 500));

    a.device.push_local(key(30, 1));
    let device_b = b.device.clone();
    wait_until(move || device_b.written().contains(&key(30, 1))).await;

    // Assert: A's own virtual device never saw its forwarded key.
    assert!(!a.device.written().contains(&key(30, 1)));
    cancel.cancel();
}

#[tokio::test]
async fn test_emergency_release_returns_control_to_a() {
    // Arrange
    let cancel = CancellationToken::new();
    let (a, b) = two_peers(&cancel).await;
    cross_right_edge(&a).await;
    let device_b = b.device.clone();
    wait_until(move || !device_b.written().is_empty()).await;

    // Act
    for _ in 0..3 {
        a.device.push_local(key(event_code::KEY_LEFTALT, 1));
        a.device.push_local(key(event_code::KEY_LEFTALT, 0));
    }
    let device_a = a.device.clone();
    wait_until(move || !device_a.is_grabbed()).await;

    // Assert: keys typed after the release stay local.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = b.device.written().len();
    a.device.push_local(key(31, 1));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(b.device.written().len(), before);
    cancel.cancel();
}

#[tokio::test]
async fn test_entering_peer_keeps_focus_after_cursor_lands() {
    // Arrange
    let cancel = CancellationToken::new();
    let (a, b) = two_peers(&cancel).await;

    // Act
    cross_right_edge(&a).await;
    let display_b = b.display.clone();
    wait_until(move || display_b.cursor_position().unwrap() == Vector2::new(1921, 500)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Assert: several watch ticks later, focus has not bounced back to A.
    assert!(a.device.is_grabbed(), "A must still be forwarding");
    assert_eq!(b.display.cursor_position().unwrap(), Vector2::new(1921, 500));
    a.device.push_local(key(32, 1));
    let device_b = b.device.clone();
    wait_until(move || device_b.written().contains(&key(32, 1))).await;
    cancel.cancel();
}
