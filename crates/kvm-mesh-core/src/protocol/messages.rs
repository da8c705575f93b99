//! All KVM-Mesh protocol message types.
//!
//! Two independent wire formats live here:
//!
//! - **Relay frames** travel over the persistent WebSocket between a peer and
//!   the relay.  Each frame is `[type:1][';':1][msgpack payload]`.
//! - **Discovery datagrams** travel over UDP multicast during relay election.
//!   Each datagram is a single msgpack-encoded [`DiscoveryMessage`].
//!
//! Message-type bytes are part of the protocol contract: never renumber an
//! existing variant, only append.

use serde::{Deserialize, Serialize};

use crate::domain::geometry::{DisplayBounds, Vector2};
use crate::domain::topology::{PeerId, TransitionZone};
use crate::protocol::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol API version carried in discovery datagrams.
///
/// Peers only elect or join relays that advertise the same version.
pub const API_VERSION: u8 = 1;

/// Byte placed between the message-type byte and the payload of a relay frame.
pub const FRAME_SEPARATOR: u8 = b';';

// ── Relay message types ───────────────────────────────────────────────────────

/// One-byte discriminant of a relay frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Connect = 0,
    FocusReceived = 1,
    ChangeFocus = 2,
    ReleaseFocus = 3,
    InputEvent = 4,
    TransitionZoneAssigned = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(MessageType::Connect),
            1 => Ok(MessageType::FocusReceived),
            2 => Ok(MessageType::ChangeFocus),
            3 => Ok(MessageType::ReleaseFocus),
            4 => Ok(MessageType::InputEvent),
            5 => Ok(MessageType::TransitionZoneAssigned),
            other => Err(other),
        }
    }
}

// ── Input events ──────────────────────────────────────────────────────────────

/// evdev event types used by the relay and the agents.
pub mod event_type {
    pub const EV_SYN: u16 = 0x00;
    pub const EV_KEY: u16 = 0x01;
    pub const EV_REL: u16 = 0x02;
}

/// evdev codes used by the agents.
pub mod event_code {
    pub const SYN_REPORT: u16 = 0;
    pub const REL_X: u16 = 0x00;
    pub const REL_Y: u16 = 0x01;
    pub const KEY_LEFTALT: u16 = 56;
    pub const KEY_RIGHTALT: u16 = 100;
}

/// Key state values carried in `value` for `EV_KEY` events.
pub mod key_value {
    pub const RELEASED: i32 = 0;
    pub const PRESSED: i32 = 1;
    pub const REPEAT: i32 = 2;
}

/// Kernel-style timestamp: seconds and microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i64,
}

/// A raw input event, modelled on the Linux evdev `input_event` layout.
///
/// The relay never interprets these; it forwards them verbatim to the focus
/// owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputEvent {
    pub time: Timeval,
    #[serde(rename = "type")]
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub fn new(kind: u16, code: u16, value: i32) -> Self {
        Self {
            time: Timeval::default(),
            kind,
            code,
            value,
        }
    }

    /// Returns `true` if this is the release of either Alt key.
    ///
    /// These are the events counted by the emergency-release detector.
    pub fn is_modifier_release(&self) -> bool {
        self.kind == event_type::EV_KEY
            && (self.code == event_code::KEY_LEFTALT || self.code == event_code::KEY_RIGHTALT)
            && self.value == key_value::RELEASED
    }

    /// Builds the two relative-motion events plus the sync report needed to
    /// move a virtual pointer by `delta`.
    pub fn relative_motion(delta: Vector2) -> [InputEvent; 3] {
        [
            InputEvent::new(event_type::EV_REL, event_code::REL_X, delta.x),
            InputEvent::new(event_type::EV_REL, event_code::REL_Y, delta.y),
            InputEvent::new(event_type::EV_SYN, event_code::SYN_REPORT, 0),
        ]
    }
}

// ── Relay payloads ────────────────────────────────────────────────────────────

/// CONNECT (0): first frame on every peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectMessage {
    pub hostname: String,
    pub peer_id: PeerId,
    pub displays: Vec<DisplayBounds>,
}

impl ConnectMessage {
    /// Checks every reported display with [`DisplayBounds::is_valid`].
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidDisplay`] naming the first bad monitor.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self.displays.iter().position(|d| !d.is_valid()) {
            Some(index) => Err(ProtocolError::InvalidDisplay {
                index,
                bounds: self.displays[index],
            }),
            None => Ok(()),
        }
    }
}

/// FOCUS_RECEIVED (1): relay tells the new owner where the cursor entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusReceivedMessage {
    /// Cursor position on the receiving peer, in its local display space.
    pub source_pos: Vector2,
}

/// CHANGE_FOCUS (2): request to hand focus to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFocusMessage {
    pub target: PeerId,
    /// Projected cursor position on the target peer.
    pub cursor_pos: Vector2,
}

/// TRANSITION_ZONE_ASSIGNED (5): the receiving peer's complete zone list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionZoneAssignedMessage {
    pub zones: Vec<TransitionZone>,
}

/// Every message that can travel between a peer and the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Connect(ConnectMessage),
    FocusReceived(FocusReceivedMessage),
    ChangeFocus(ChangeFocusMessage),
    /// RELEASE_FOCUS (3): carries no payload.
    ReleaseFocus,
    /// INPUT_EVENT (4).
    InputEvent(InputEvent),
    TransitionZoneAssigned(TransitionZoneAssignedMessage),
}

impl RelayMessage {
    /// Returns the wire discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            RelayMessage::Connect(_) => MessageType::Connect,
            RelayMessage::FocusReceived(_) => MessageType::FocusReceived,
            RelayMessage::ChangeFocus(_) => MessageType::ChangeFocus,
            RelayMessage::ReleaseFocus => MessageType::ReleaseFocus,
            RelayMessage::InputEvent(_) => MessageType::InputEvent,
            RelayMessage::TransitionZoneAssigned(_) => MessageType::TransitionZoneAssigned,
        }
    }
}

// ── Discovery datagrams ───────────────────────────────────────────────────────

/// Kind of a discovery datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum DiscoveryKind {
    /// "Is there a relay for my cluster?"
    Query = 0,
    /// "I am the relay; connect to my port."
    ServerAnnounce = 1,
}

impl From<DiscoveryKind> for u8 {
    fn from(kind: DiscoveryKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for DiscoveryKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(DiscoveryKind::Query),
            1 => Ok(DiscoveryKind::ServerAnnounce),
            other => Err(format!("unknown discovery kind {other}")),
        }
    }
}

/// Election datagram exchanged over multicast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    #[serde(rename = "type")]
    pub kind: DiscoveryKind,
    pub api_version: u8,
    /// Relay TCP port; meaningful only in `ServerAnnounce`.
    pub server_port: u16,
    pub cluster_id: String,
    /// Sender's process start time, in milliseconds since the Unix epoch.
    pub start_time_millis: i64,
}

impl DiscoveryMessage {
    pub fn query(cluster_id: impl Into<String>, start_time_millis: i64) -> Self {
        Self {
            kind: DiscoveryKind::Query,
            api_version: API_VERSION,
            server_port: 0,
            cluster_id: cluster_id.into(),
            start_time_millis,
        }
    }

    pub fn announce(
        cluster_id: impl Into<String>,
        start_time_millis: i64,
        server_port: u16,
    ) -> Self {
        Self {
            kind: DiscoveryKind::ServerAnnounce,
            api_version: API_VERSION,
            server_port,
            cluster_id: cluster_id.into(),
            start_time_millis,
        }
    }

    /// Returns `true` if the sender speaks our API version and cluster.
    pub fn is_compatible(&self, api_version: u8, cluster_id: &str) -> bool {
        self.api_version == api_version && self.cluster_id == cluster_id
    }
}
