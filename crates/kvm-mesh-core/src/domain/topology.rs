//! Topology engine: peer arrangement and transition-zone computation.
//!
//! Peers form a one-dimensional chain ordered by arrival.  Peer *i* is adjacent
//! to peer *i-1* on its left and peer *i+1* on its right, nothing else.  For
//! every adjacent pair the engine emits a mirrored pair of 1-pixel-wide
//! vertical zones:
//!
//! ```text
//!   peer A (right-most display)        peer B (left-most display)
//!  ┌──────────────────────────┐       ┌──────────────────────────┐
//!  │                         ▐│ ───►  │▌                         │
//!  │                 zone(A)▐│ Right │▌zone(B)                  │
//!  │                         ▐│ ◄───  │▌         Left            │
//!  └──────────────────────────┘       └──────────────────────────┘
//! ```
//!
//! Zone coordinates are expressed in the *owning peer's local display space*,
//! because each peer compares them against its own cursor position.  The
//! height of both zones is `min(heightA, heightB)`, measured from the top of
//! each display.
//!
//! Computation is a pure function of the ordered peer list: no randomness, no
//! floating point, and the result map is a `BTreeMap` so iteration order is
//! stable too.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::geometry::{DisplayBounds, Direction, Rect, Vector2};

/// Unique identifier for a peer.
pub type PeerId = Uuid;

/// Transition zones for every known peer, keyed by peer id.
pub type ZoneMap = BTreeMap<PeerId, Vec<TransitionZone>>;

/// A participant known to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub hostname: String,
    /// Monitor geometry in the peer's local display space.
    pub displays: Vec<DisplayBounds>,
    /// Where the peer's local display space sits inside the shared virtual space.
    pub origin_offset: Vector2,
}

impl Peer {
    pub fn new(id: PeerId, hostname: impl Into<String>, displays: Vec<DisplayBounds>) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            displays,
            origin_offset: Vector2::ZERO,
        }
    }

    /// Bounding rectangle of all displays in local space, if any.
    pub fn local_extent(&self) -> Option<Rect> {
        self.displays
            .iter()
            .map(DisplayBounds::rect)
            .reduce(|acc, r| {
                Rect::new(
                    acc.left.min(r.left),
                    acc.top.min(r.top),
                    acc.right.max(r.right),
                    acc.bottom.max(r.bottom),
                )
            })
    }
}

/// The far side of a transition zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneTarget {
    pub peer_id: PeerId,
    /// The mirrored zone on the target peer, in the target's local space.
    pub bounds: Rect,
}

/// A screen-edge trigger region on one peer.
///
/// When the cursor sits inside `bounds` while moving in `direction`, focus is
/// handed to `target.peer_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionZone {
    pub bounds: Rect,
    pub direction: Direction,
    pub target: ZoneTarget,
}

impl TransitionZone {
    /// Returns `true` when a cursor that moved from `last` to `current` should
    /// trigger this zone.
    pub fn should_transition(&self, current: Vector2, last: Vector2) -> bool {
        self.bounds.contains(current) && self.direction.matches_motion(current - last)
    }

    /// Maps a cursor position inside this zone onto the entry point on the
    /// target peer.
    ///
    /// The offset along the zone's long axis is preserved and clamped into the
    /// target bounds, so a cursor 300px below the top of zone A enters 300px
    /// below the top of zone B.  The entry point sits one pixel past the
    /// target zone in the crossing direction, so the cursor lands outside the
    /// target's return zone and cannot bounce straight back.
    pub fn project(&self, pos: Vector2) -> Vector2 {
        let target = self.target.bounds;
        let along_edge = match self.direction {
            Direction::Left | Direction::Right => {
                Vector2::new(target.left, target.top + (pos.y - self.bounds.top))
            }
            Direction::Up | Direction::Down => {
                Vector2::new(target.left + (pos.x - self.bounds.left), target.top)
            }
            Direction::None => Vector2::new(target.left, target.top),
        };
        target.clamp(along_edge) + self.direction.unit()
    }
}

/// Computes the transition zones for an ordered list of peers.
///
/// Every peer gets an entry, empty when it has no neighbour.  Peers without
/// displays offer no edge and are skipped when building the chain, so their
/// neighbours become adjacent to each other.
pub fn compute_zones(peers: &[Peer]) -> ZoneMap {
    let mut zones: ZoneMap = peers.iter().map(|p| (p.id, Vec::new())).collect();

    let chain: Vec<&Peer> = peers
        .iter()
        .filter(|p| {
            if p.displays.is_empty() {
                debug!("peer {} reported no displays; excluded from the chain", p.id);
                false
            } else {
                true
            }
        })
        .collect();

    for pair in chain.windows(2) {
        let (peer_a, peer_b) = (pair[0], pair[1]);
        let (Some(screen_a), Some(screen_b)) = (
            right_most_display(&peer_a.displays),
            left_most_display(&peer_b.displays),
        ) else {
            continue;
        };

        let height = screen_a.height.min(screen_b.height);
        let edge_a = Rect::new(
            screen_a.right() - 1,
            screen_a.position.y,
            screen_a.right() - 1,
            screen_a.position.y.saturating_add(height),
        );
        let edge_b = Rect::new(
            screen_b.position.x,
            screen_b.position.y,
            screen_b.position.x,
            screen_b.position.y.saturating_add(height),
        );

        if let Some(list) = zones.get_mut(&peer_a.id) {
            list.push(TransitionZone {
                bounds: edge_a,
                direction: Direction::Right,
                target: ZoneTarget {
                    peer_id: peer_b.id,
                    bounds: edge_b,
                },
            });
        }
        if let Some(list) = zones.get_mut(&peer_b.id) {
            list.push(TransitionZone {
                bounds: edge_b,
                direction: Direction::Left,
                target: ZoneTarget {
                    peer_id: peer_a.id,
                    bounds: edge_a,
                },
            });
        }
    }

    zones
}

/// Display with the greatest right edge; ties go to the smaller Y origin.
fn right_most_display(displays: &[DisplayBounds]) -> Option<&DisplayBounds> {
    displays.iter().reduce(|best, d| {
        if d.right() > best.right() || (d.right() == best.right() && d.position.y < best.position.y)
        {
            d
        } else {
            best
        }
    })
}

/// Display with the smallest left edge; ties go to the smaller Y origin.
fn left_most_display(displays: &[DisplayBounds]) -> Option<&DisplayBounds> {
    displays.iter().reduce(|best, d| {
        if d.position.x < best.position.x
            || (d.position.x == best.position.x && d.position.y < best.position.y)
        {
            d
        } else {
            best
        }
    })
}

/// Ordered peer table with virtual-space placement.
///
/// Arrival order is preserved: new peers are appended, a reconnecting peer
/// keeps its slot, removal closes the gap.  Origin offsets are recomputed
/// after every change so that each peer sits immediately to the right of the
/// ones before it, top-aligned at virtual y = 0.
#[derive(Debug, Default, Clone)]
pub struct ScreenArrangement {
    peers: Vec<Peer>,
}

impl ScreenArrangement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer, or replaces hostname and displays of an existing one in place.
    ///
    /// Returns `true` if the peer was not previously known.
    pub fn upsert(&mut self, id: PeerId, hostname: &str, displays: Vec<DisplayBounds>) -> bool {
        let added = match self.peers.iter_mut().find(|p| p.id == id) {
            Some(existing) => {
                existing.hostname = hostname.to_string();
                existing.displays = displays;
                false
            }
            None => {
                self.peers.push(Peer::new(id, hostname, displays));
                true
            }
        };
        self.place_peers();
        added
    }

    /// Removes a peer; returns it if it was present.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        let index = self.peers.iter().position(|p| p.id == id)?;
        let removed = self.peers.remove(index);
        self.place_peers();
        Some(removed)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.iter().any(|p| p.id == id)
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == id)
    }

    /// Peers in arrival order.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Recomputes every peer's transition zones from scratch.
    pub fn transition_zones(&self) -> ZoneMap {
        compute_zones(&self.peers)
    }

    /// Bounding rectangle of all displays placed in virtual space.
    pub fn virtual_bounds(&self) -> Option<Rect> {
        self.peers
            .iter()
            .filter_map(|p| p.local_extent().map(|r| r.translate(p.origin_offset)))
            .reduce(|acc, r| {
                Rect::new(
                    acc.left.min(r.left),
                    acc.top.min(r.top),
                    acc.right.max(r.right),
                    acc.bottom.max(r.bottom),
                )
            })
    }

    fn place_peers(&mut self) {
        let mut cursor_x: i32 = 0;
        for peer in &mut self.peers {
            match peer.local_extent() {
                Some(extent) => {
                    peer.origin_offset = Vector2::new(
                        cursor_x.saturating_sub(extent.left),
                        extent.top.saturating_neg(),
                    );
                    cursor_x = cursor_x.saturating_add(extent.width());
                }
                None => peer.origin_offset = Vector2::new(cursor_x, 0),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
