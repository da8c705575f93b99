//! PeerAgent: the per-machine focus state machine.
//!
//! The agent sits between three event sources and one sink:
//!
//! ```text
//!  local device ──┐
//!  relay link   ──┼─► AgentEvent ─► PeerAgent::handle ─► Vec<RelayMessage> ─► relay link
//!  zone watcher ──┘                       │
//!                                         └─► device writes / grabs, zone cache
//! ```
//!
//! # Forwarding vs. receiving (for beginners)
//!
//! A peer is in one of three situations at any moment:
//!
//! - **idle**: its keyboard and mouse drive only itself.
//! - **forwarding**: the user pushed the cursor across an edge, so the local
//!   devices are grabbed and every local event is sent to the relay, which
//!   hands it to whichever peer owns focus.
//! - **receiving**: this peer owns focus, so events arriving from the relay
//!   are injected through the local virtual device.
//!
//! `forwarding` and `receiving` are never both `true`.
//!
//! # Cursor warps
//!
//! When the agent moves the cursor itself (entering on focus, recentering on
//! release) it first publishes the destination on a `watch` channel.  The
//! zone watcher treats that position as its new baseline, so the jump is
//! never mistaken for the user pushing the cursor into an edge.
//!
//! All decisions are made in [`PeerAgent::handle`], which is synchronous and
//! takes the current time as a parameter.  The async [`PeerAgent::run`] loop
//! only feeds events in and pushes replies out, so the whole state machine is
//! unit-testable without timers or sockets.

use std::sync::Arc;
use std::time::Instant;

use kvm_mesh_core::protocol::messages::{ChangeFocusMessage, TransitionZoneAssignedMessage};
use kvm_mesh_core::{
    EmergencyReleaseDetector, InputEvent, PeerId, RelayMessage, TransitionZone, Vector2,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::display::DisplayServer;
use crate::infrastructure::input_device::InputDevice;

/// Everything the agent reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// An event read from the local keyboard or mouse.
    Local(InputEvent),
    /// A frame received from the relay.
    Relay(RelayMessage),
    /// The cursor crossed a transition zone; `cursor_pos` is already
    /// projected into the target peer's display space.
    ZoneCrossed { target: PeerId, cursor_pos: Vector2 },
}

/// Per-machine focus state machine.
pub struct PeerAgent {
    device: Arc<dyn InputDevice>,
    display: Arc<dyn DisplayServer>,
    detector: EmergencyReleaseDetector,
    forwarding: bool,
    receiving: bool,
    zones: watch::Sender<Vec<TransitionZone>>,
    warps: watch::Sender<Vector2>,
}

impl PeerAgent {
    pub fn new(
        device: Arc<dyn InputDevice>,
        display: Arc<dyn DisplayServer>,
        detector: EmergencyReleaseDetector,
    ) -> Self {
        let (zones, _) = watch::channel(Vec::new());
        let (warps, _) = watch::channel(Vector2::ZERO);
        Self {
            device,
            display,
            detector,
            forwarding: false,
            receiving: false,
            zones,
            warps,
        }
    }

    /// Returns a receiver that always sees the latest zone list.
    pub fn zones(&self) -> watch::Receiver<Vec<TransitionZone>> {
        self.zones.subscribe()
    }

    /// Returns a receiver notified of every cursor position the agent sets
    /// on its own.
    pub fn cursor_warps(&self) -> watch::Receiver<Vector2> {
        self.warps.subscribe()
    }

    pub fn is_forwarding(&self) -> bool {
        self.forwarding
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    /// Applies one event and returns the frames to send to the relay.
    pub fn handle(&mut self, event: AgentEvent, now: Instant) -> Vec<RelayMessage> {
        match event {
            AgentEvent::Local(input) => self.on_local_input(input, now),
            AgentEvent::Relay(message) => {
                self.on_relay_message(message);
                Vec::new()
            }
            AgentEvent::ZoneCrossed { target, cursor_pos } => {
                self.on_zone_crossed(target, cursor_pos)
            }
        }
    }

    /// Drives the agent until `cancel` fires or either channel closes.
    ///
    /// Device grabs are always released on exit.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<AgentEvent>,
        relay: mpsc::UnboundedSender<RelayMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            for message in self.handle(event, Instant::now()) {
                if relay.send(message).is_err() {
                    debug!("relay link closed; agent stopping");
                    self.shutdown();
                    return;
                }
            }
        }
        self.shutdown();
    }

    // ── Event handlers ────────────────────────────────────────────────────────

    fn on_local_input(&mut self, input: InputEvent, now: Instant) -> Vec<RelayMessage> {
        if input.is_modifier_release() && self.detector.record(now) {
            info!("emergency release triggered");
            self.forwarding = false;
            self.receiving = false;
            self.release_grab();
            return vec![RelayMessage::ReleaseFocus];
        }

        if self.forwarding {
            vec![RelayMessage::InputEvent(input)]
        } else {
            Vec::new()
        }
    }

    fn on_relay_message(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::InputEvent(input) => {
                if !self.receiving {
                    return;
                }
                if let Err(e) = self.device.write_event(&input) {
                    warn!("failed to inject remote input: {e}");
                }
            }
            RelayMessage::FocusReceived(received) => {
                if self.forwarding {
                    // Focus came back to us.
                    self.forwarding = false;
                    self.release_grab();
                } else {
                    self.receiving = true;
                }
                info!(pos = ?received.source_pos, "focus received");
                self.move_cursor_to(received.source_pos);
            }
            RelayMessage::ReleaseFocus => {
                let involved = self.forwarding || self.receiving;
                self.forwarding = false;
                self.receiving = false;
                self.release_grab();
                if involved {
                    self.recenter();
                }
                info!("focus released");
            }
            RelayMessage::TransitionZoneAssigned(TransitionZoneAssignedMessage { zones }) => {
                debug!(count = zones.len(), "transition zones assigned");
                self.zones.send_replace(zones);
            }
            other => {
                debug!(kind = ?other.message_type(), "ignoring peer-to-relay message from relay");
            }
        }
    }

    fn on_zone_crossed(&mut self, target: PeerId, cursor_pos: Vector2) -> Vec<RelayMessage> {
        if self.receiving {
            // Focus moves on from us to a third peer; whoever is forwarding
            // keeps forwarding.
            self.receiving = false;
        } else if !self.forwarding {
            self.forwarding = true;
            if let Err(e) = self.device.grab() {
                warn!("failed to grab local devices: {e}");
            }
        } else {
            return Vec::new();
        }

        info!(%target, pos = ?cursor_pos, "transition zone crossed");
        vec![RelayMessage::ChangeFocus(ChangeFocusMessage {
            target,
            cursor_pos,
        })]
    }

    // ── Device helpers ────────────────────────────────────────────────────────

    fn release_grab(&self) {
        if let Err(e) = self.device.release() {
            warn!("failed to release local devices: {e}");
        }
    }

    fn move_cursor_to(&self, target: Vector2) {
        let current = match self.display.cursor_position() {
            Ok(pos) => pos,
            Err(e) => {
                warn!("cannot position cursor: {e}");
                return;
            }
        };
        let delta = target - current;
        if delta == Vector2::ZERO {
            return;
        }
        self.warps.send_replace(target);
        for event in InputEvent::relative_motion(delta) {
            if let Err(e) = self.device.write_event(&event) {
                warn!("failed to move cursor: {e}");
                return;
            }
        }
    }

    fn recenter(&self) {
        match self.display.displays() {
            Ok(displays) => {
                if let Some(first) = displays.first() {
                    self.move_cursor_to(first.center());
                }
            }
            Err(e) => warn!("cannot recenter cursor: {e}"),
        }
    }

    fn shutdown(&mut self) {
        self.forwarding = false;
        self.receiving = false;
        self.release_grab();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kvm_mesh_core::protocol::messages::{event_code, event_type, FocusReceivedMessage};
    use kvm_mesh_core::{Direction, DisplayBounds, Rect, ZoneTarget};
    use uuid::Uuid;

    use super::*;
    use crate::infrastructure::display::mock::MockDisplayServer;
    use crate::infrastructure::display::{DisplayError, MockDisplayServer as AutoDisplay};
    use crate::infrastructure::input_device::mock::MockInputDevice;
    use crate::infrastructure::input_device::{DeviceError, MockInputDevice as AutoDevice};

    fn agent() -> (PeerAgent, Arc<MockInputDevice>, Arc<MockDisplayServer>) {
        let device = Arc::new(MockInputDevice::new());
        let display = Arc::new(MockDisplayServer::single_1080p());
        let agent = PeerAgent::new(
            device.clone(),
            display.clone(),
            EmergencyReleaseDetector::new(3, Duration::from_secs(1)),
        );
        (agent, device, display)
    }

    fn alt_up() -> InputEvent {
        InputEvent::new(event_type::EV_KEY, event_code::KEY_LEFTALT, 0)
    }

    fn key_a() -> InputEvent {
        InputEvent::new(event_type::EV_KEY, 30, 1)
    }

    fn crossed(target: PeerId) -> AgentEvent {
        AgentEvent::ZoneCrossed {
            target,
            cursor_pos: Vector2::new(0, 500),
        }
    }

    #[test]
    fn test_local_input_is_not_sent_while_idle() {
        let (mut agent, _, _) = agent();

        let out = agent.handle(AgentEvent::Local(key_a()), Instant::now());

        assert!(out.is_empty());
    }

    #[test]
    fn test_zone_crossing_grabs_and_requests_focus_change() {
        // Arrange
        let (mut agent, device, _) = agent();
        let target = Uuid::new_v4();

        // Act
        let out = agent.handle(crossed(target), Instant::now());

        // Assert
        assert_eq!(
            out,
            vec![RelayMessage::ChangeFocus(ChangeFocusMessage {
                target,
                cursor_pos: Vector2::new(0, 500),
            })]
        );
        assert!(agent.is_forwarding());
        assert!(device.is_grabbed());
    }

    #[test]
    fn test_forwarding_agent_sends_local_input() {
        let (mut agent, _, _) = agent();
        agent.handle(crossed(Uuid::new_v4()), Instant::now());

        let out = agent.handle(AgentEvent::Local(key_a()), Instant::now());

        assert_eq!(out, vec![RelayMessage::InputEvent(key_a())]);
    }

    #[test]
    fn test_second_crossing_while_forwarding_is_ignored() {
        let (mut agent, _, _) = agent();
        agent.handle(crossed(Uuid::new_v4()), Instant::now());

        let out = agent.handle(crossed(Uuid::new_v4()), Instant::now());

        assert!(out.is_empty());
        assert!(agent.is_forwarding());
    }

    #[test]
    fn test_focus_received_starts_receiving_and_positions_cursor() {
        // Arrange
        let (mut agent, device, display) = agent();
        display.set_cursor(Vector2::new(100, 100));

        // Act
        agent.handle(
            AgentEvent::Relay(RelayMessage::FocusReceived(FocusReceivedMessage {
                source_pos: Vector2::new(0, 500),
            })),
            Instant::now(),
        );

        // Assert
        assert!(agent.is_receiving());
        assert_eq!(
            device.written(),
            InputEvent::relative_motion(Vector2::new(-100, 400)).to_vec()
        );
    }

    #[test]
    fn test_positioning_the_cursor_publishes_a_warp() {
        // Arrange
        let (mut agent, _, display) = agent();
        let mut warps = agent.cursor_warps();
        display.set_cursor(Vector2::new(960, 540));

        // Act
        agent.handle(
            AgentEvent::Relay(RelayMessage::FocusReceived(FocusReceivedMessage {
                source_pos: Vector2::new(1, 500),
            })),
            Instant::now(),
        );

        // Assert
        assert!(warps.has_changed().unwrap());
        assert_eq!(*warps.borrow_and_update(), Vector2::new(1, 500));
    }

    #[test]
    fn test_entering_at_the_current_position_publishes_no_warp() {
        let (mut agent, device, display) = agent();
        let warps = agent.cursor_warps();
        display.set_cursor(Vector2::new(1, 500));

        agent.handle(
            AgentEvent::Relay(RelayMessage::FocusReceived(FocusReceivedMessage {
                source_pos: Vector2::new(1, 500),
            })),
            Instant::now(),
        );

        assert!(!warps.has_changed().unwrap());
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_remote_input_is_injected_only_while_receiving() {
        let (mut agent, device, _) = agent();
        agent.handle(AgentEvent::Relay(RelayMessage::InputEvent(key_a())), Instant::now());
        assert!(device.written().is_empty());

        agent.handle(
            AgentEvent::Relay(RelayMessage::FocusReceived(FocusReceivedMessage {
                source_pos: Vector2::ZERO,
            })),
            Instant::now(),
        );
        agent.handle(AgentEvent::Relay(RelayMessage::InputEvent(key_a())), Instant::now());

        assert_eq!(device.written(), vec![key_a()]);
    }

    #[test]
    fn test_focus_returning_to_forwarder_stops_forwarding() {
        let (mut agent, device, _) = agent();
        agent.handle(crossed(Uuid::new_v4()), Instant::now());

        agent.handle(
            AgentEvent::Relay(RelayMessage::FocusReceived(FocusReceivedMessage {
                source_pos: Vector2::new(1919, 10),
            })),
            Instant::now(),
        );

        assert!(!agent.is_forwarding());
        assert!(!agent.is_receiving());
        assert!(!device.is_grabbed());
    }

    #[test]
    fn test_crossing_while_receiving_hands_focus_on_without_grabbing() {
        let (mut agent, device, _) = agent();
        agent.handle(
            AgentEvent::Relay(RelayMessage::FocusReceived(FocusReceivedMessage {
                source_pos: Vector2::ZERO,
            })),
            Instant::now(),
        );

        let out = agent.handle(crossed(Uuid::new_v4()), Instant::now());

        assert_eq!(out.len(), 1);
        assert!(!agent.is_receiving());
        assert!(!agent.is_forwarding());
        assert!(!device.is_grabbed());
    }

    #[test]
    fn test_release_focus_clears_flags_and_recenters() {
        // Arrange
        let (mut agent, device, display) = agent();
        agent.handle(crossed(Uuid::new_v4()), Instant::now());
        display.set_cursor(Vector2::new(1919, 500));

        // Act
        agent.handle(AgentEvent::Relay(RelayMessage::ReleaseFocus), Instant::now());

        // Assert
        assert!(!agent.is_forwarding());
        assert!(!device.is_grabbed());
        assert_eq!(
            device.written(),
            InputEvent::relative_motion(Vector2::new(960 - 1919, 540 - 500)).to_vec()
        );
    }

    #[test]
    fn test_release_focus_while_idle_leaves_cursor_alone() {
        let (mut agent, device, _) = agent();

        agent.handle(AgentEvent::Relay(RelayMessage::ReleaseFocus), Instant::now());

        assert!(device.written().is_empty());
    }

    #[test]
    fn test_rapid_alt_taps_trigger_emergency_release() {
        // Arrange
        let (mut agent, device, _) = agent();
        agent.handle(crossed(Uuid::new_v4()), Instant::now());
        let start = Instant::now();

        // Act
        let first = agent.handle(AgentEvent::Local(alt_up()), start);
        let second = agent.handle(AgentEvent::Local(alt_up()), start + Duration::from_millis(200));
        let third = agent.handle(AgentEvent::Local(alt_up()), start + Duration::from_millis(400));

        // Assert: the first two taps are still forwarded.
        assert_eq!(first, vec![RelayMessage::InputEvent(alt_up())]);
        assert_eq!(second, vec![RelayMessage::InputEvent(alt_up())]);
        assert_eq!(third, vec![RelayMessage::ReleaseFocus]);
        assert!(!agent.is_forwarding());
        assert!(!device.is_grabbed());
    }

    #[test]
    fn test_emergency_release_fires_even_when_idle() {
        let (mut agent, _, _) = agent();
        let start = Instant::now();

        agent.handle(AgentEvent::Local(alt_up()), start);
        agent.handle(AgentEvent::Local(alt_up()), start + Duration::from_millis(100));
        let out = agent.handle(AgentEvent::Local(alt_up()), start + Duration::from_millis(200));

        assert_eq!(out, vec![RelayMessage::ReleaseFocus]);
    }

    #[test]
    fn test_zone_assignment_replaces_cached_list() {
        // Arrange
        let (mut agent, _, _) = agent();
        let zones = agent.zones();
        let zone = TransitionZone {
            bounds: Rect::new(1919, 0, 1919, 1080),
            direction: Direction::Right,
            target: ZoneTarget {
                peer_id: Uuid::new_v4(),
                bounds: Rect::new(1920, 0, 1920, 1080),
            },
        };

        // Act
        agent.handle(
            AgentEvent::Relay(RelayMessage::TransitionZoneAssigned(
                TransitionZoneAssignedMessage { zones: vec![zone] },
            )),
            Instant::now(),
        );

        // Assert
        assert_eq!(*zones.borrow(), vec![zone]);
    }

    #[test]
    fn test_cursor_query_failure_skips_positioning() {
        // Arrange
        let device = Arc::new(MockInputDevice::new());
        let mut display = AutoDisplay::new();
        display
            .expect_cursor_position()
            .returning(|| Err(DisplayError::Platform("no display".into())));
        display
            .expect_displays()
            .returning(|| Ok(vec![DisplayBounds::new(0, 0, 800, 600)]));
        let mut agent = PeerAgent::new(
            device.clone(),
            Arc::new(display),
            EmergencyReleaseDetector::new(3, Duration::from_secs(1)),
        );

        // Act
        agent.handle(
            AgentEvent::Relay(RelayMessage::FocusReceived(FocusReceivedMessage {
                source_pos: Vector2::new(5, 5),
            })),
            Instant::now(),
        );

        // Assert
        assert!(agent.is_receiving());
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_grab_failure_still_requests_focus_change() {
        // Arrange
        let mut device = AutoDevice::new();
        device
            .expect_grab()
            .times(1)
            .returning(|| Err(DeviceError::Platform("permission denied".into())));
        let mut agent = PeerAgent::new(
            Arc::new(device),
            Arc::new(MockDisplayServer::single_1080p()),
            EmergencyReleaseDetector::new(3, Duration::from_secs(1)),
        );

        // Act
        let out = agent.handle(crossed(Uuid::new_v4()), Instant::now());

        // Assert
        assert_eq!(out.len(), 1);
        assert!(agent.is_forwarding());
    }

    #[tokio::test]
    async fn test_run_forwards_replies_and_releases_grab_on_exit() {
        // Arrange
        let (agent, device, _) = agent();
        let (events_tx, events_rx) = mpsc::channel(8);
        let (relay_tx, mut relay_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let target = Uuid::new_v4();
        let handle = tokio::spawn(agent.run(events_rx, relay_tx, cancel.clone()));

        // Act
        events_tx.send(crossed(target)).await.unwrap();
        let reply = relay_rx.recv().await.unwrap();
        assert!(device.is_grabbed());
        cancel.cancel();
        handle.await.unwrap();

        // Assert
        assert!(matches!(reply, RelayMessage::ChangeFocus(m) if m.target == target));
        assert!(!device.is_grabbed());
    }
}
