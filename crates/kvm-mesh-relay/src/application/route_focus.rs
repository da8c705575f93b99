//! FocusCoordinator: the relay's focus-ownership state machine.
//!
//! This use case is the heart of the relay.  It owns the ordered peer table,
//! the single `FocusOwner` slot and the cache of the last zone list pushed to
//! each peer.  Every connection task funnels its decoded messages into one
//! actor, and that actor is the only caller of this type, so all mutations
//! are serialized without a lock.
//!
//! # Architecture
//!
//! The coordinator does no I/O.  Each handler returns the list of
//! [`Outbound`] messages to deliver; the infrastructure layer encodes them and
//! pushes them into per-peer queues.  That keeps the state machine fully
//! unit-testable with plain values.
//!
//! # Focus rules
//!
//! - `InputEvent` goes to the owner only.  With no owner, or when the owner
//!   itself sent it, the event is dropped.
//! - `ChangeFocus` is accepted when there is no owner or the requester is the
//!   owner, and the target is a connected peer.  The new owner receives
//!   `FocusReceived` with the entry position.
//! - `ReleaseFocus` clears the owner and is broadcast to every peer.
//! - Losing the owner's connection behaves like a `ReleaseFocus`.

use kvm_mesh_core::protocol::messages::{
    ChangeFocusMessage, ConnectMessage, FocusReceivedMessage, TransitionZoneAssignedMessage,
};
use kvm_mesh_core::{PeerId, RelayMessage, ScreenArrangement, ZoneMap};
use tracing::{debug, info, warn};

/// A message the relay must deliver to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: PeerId,
    pub message: RelayMessage,
}

impl Outbound {
    fn new(to: PeerId, message: RelayMessage) -> Self {
        Self { to, message }
    }
}

/// The relay's authoritative focus and membership state.
#[derive(Debug, Default)]
pub struct FocusCoordinator {
    arrangement: ScreenArrangement,
    owner: Option<PeerId>,
    /// Last zone list sent to each peer.
    zones: ZoneMap,
}

impl FocusCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the peer currently receiving forwarded input, if any.
    pub fn owner(&self) -> Option<PeerId> {
        self.owner
    }

    pub fn arrangement(&self) -> &ScreenArrangement {
        &self.arrangement
    }

    /// Returns the zone list most recently assigned to `peer_id`.
    pub fn zones_for(&self, peer_id: PeerId) -> Option<&[kvm_mesh_core::TransitionZone]> {
        self.zones.get(&peer_id).map(Vec::as_slice)
    }

    /// Registers (or re-registers) a peer and redistributes zones.
    ///
    /// The connecting peer always receives its zone list, even if unchanged,
    /// because a fresh connection has no cached copy.  A `Connect` with
    /// unusable display geometry is ignored and leaves the table untouched.
    pub fn handle_connect(&mut self, connect: ConnectMessage) -> Vec<Outbound> {
        if let Err(e) = connect.validate() {
            warn!("peer {} ({}) rejected: {e}", connect.peer_id, connect.hostname);
            return Vec::new();
        }
        let added = self
            .arrangement
            .upsert(connect.peer_id, &connect.hostname, connect.displays);
        if added {
            info!(
                "peer {} ({}) joined; {} peer(s) connected",
                connect.peer_id,
                connect.hostname,
                self.arrangement.len()
            );
        } else {
            info!("peer {} ({}) reconnected", connect.peer_id, connect.hostname);
        }
        self.redistribute_zones(Some(connect.peer_id))
    }

    /// Handles any post-`Connect` message from `from`.
    pub fn handle_message(&mut self, from: PeerId, message: RelayMessage) -> Vec<Outbound> {
        match message {
            RelayMessage::InputEvent(event) => match self.owner {
                Some(owner) if owner != from => {
                    vec![Outbound::new(owner, RelayMessage::InputEvent(event))]
                }
                Some(_) => {
                    debug!("dropping input event echoed by focus owner {from}");
                    Vec::new()
                }
                None => Vec::new(),
            },
            RelayMessage::ChangeFocus(request) => self.handle_change_focus(from, request),
            RelayMessage::ReleaseFocus => self.release_focus(),
            RelayMessage::Connect(connect) if connect.peer_id == from => {
                self.handle_connect(connect)
            }
            RelayMessage::Connect(connect) => {
                warn!(
                    "peer {from} sent Connect claiming id {}; ignored",
                    connect.peer_id
                );
                Vec::new()
            }
            other @ (RelayMessage::FocusReceived(_) | RelayMessage::TransitionZoneAssigned(_)) => {
                warn!("peer {from} sent relay-only message {:?}; ignored", other.message_type());
                Vec::new()
            }
        }
    }

    /// Removes a peer whose connection closed.
    pub fn handle_disconnect(&mut self, peer_id: PeerId) -> Vec<Outbound> {
        if self.arrangement.remove(peer_id).is_none() {
            return Vec::new();
        }
        self.zones.remove(&peer_id);
        info!(
            "peer {peer_id} left; {} peer(s) connected",
            self.arrangement.len()
        );

        let mut out = Vec::new();
        if self.owner == Some(peer_id) {
            info!("focus owner {peer_id} disconnected; releasing focus");
            out.extend(self.release_focus());
        }
        out.extend(self.redistribute_zones(None));
        out
    }

    fn handle_change_focus(&mut self, from: PeerId, request: ChangeFocusMessage) -> Vec<Outbound> {
        if let Some(owner) = self.owner {
            if owner != from {
                warn!(
                    "peer {from} requested focus for {} but {owner} owns it; ignored",
                    request.target
                );
                return Vec::new();
            }
        }
        if !self.arrangement.contains(request.target) {
            warn!("peer {from} requested focus for unknown peer {}; ignored", request.target);
            return Vec::new();
        }

        info!("focus {from} -> {}", request.target);
        self.owner = Some(request.target);
        vec![Outbound::new(
            request.target,
            RelayMessage::FocusReceived(FocusReceivedMessage {
                source_pos: request.cursor_pos,
            }),
        )]
    }

    fn release_focus(&mut self) -> Vec<Outbound> {
        if let Some(owner) = self.owner.take() {
            debug!("focus released from {owner}");
        }
        self.arrangement
            .peers()
            .iter()
            .map(|p| Outbound::new(p.id, RelayMessage::ReleaseFocus))
            .collect()
    }

    /// Recomputes every zone and emits assignments for peers whose list changed.
    fn redistribute_zones(&mut self, always: Option<PeerId>) -> Vec<Outbound> {
        let fresh = self.arrangement.transition_zones();
        let out = fresh
            .iter()
            .filter(|(id, zones)| Some(**id) == always || self.zones.get(*id) != Some(*zones))
            .map(|(id, zones)| {
                Outbound::new(
                    *id,
                    RelayMessage::TransitionZoneAssigned(TransitionZoneAssignedMessage {
                        zones: zones.clone(),
                    }),
                )
            })
            .collect();
        self.zones = fresh;
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
