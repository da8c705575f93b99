//! # kvm-mesh-core
//!
//! Shared library for KVM-Mesh containing the wire protocol, the screen
//! topology engine, the relay election state machine and the emergency-release
//! detector.
//!
//! This crate is used by both the relay and the peer agent.  It has no
//! dependencies on OS input APIs, windowing systems or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! KVM-Mesh lets several machines on one LAN share a single keyboard and
//! mouse.  There is no fixed "master": on start-up the peers elect one of
//! themselves as the **relay**, and every peer (the winner included) connects
//! to it.  Whoever currently *has focus* receives the input of the machine
//! the user is physically driving; moving the cursor off a shared screen edge
//! hands focus to the neighbouring peer.
//!
//! This crate defines:
//!
//! - **`protocol`** – How bytes travel over the network: relay frames
//!   (`[type][';'][msgpack]`) and multicast discovery datagrams.
//!
//! - **`domain`** – Pure logic: geometry primitives, the topology engine that
//!   turns display rectangles into transition zones, the election state
//!   machine and the sliding-window emergency-release detector.

pub mod domain;
pub mod protocol;

pub use domain::election::{
    Election, ElectionAction, ElectionConfig, ElectionOutcome, ElectionState,
};
pub use domain::geometry::{Direction, DisplayBounds, Rect, Vector2};
pub use domain::release::EmergencyReleaseDetector;
pub use domain::topology::{
    compute_zones, Peer, PeerId, ScreenArrangement, TransitionZone, ZoneMap, ZoneTarget,
};
pub use protocol::codec::{
    decode_datagram, decode_frame, encode_datagram, encode_frame, ProtocolError,
};
pub use protocol::messages::{DiscoveryMessage, InputEvent, RelayMessage};
