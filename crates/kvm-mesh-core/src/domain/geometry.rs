//! Screen-space geometry primitives.
//!
//! All coordinates are integer pixels.  The Y axis grows downward, matching
//! every windowing system the peers run on, so "Down" means increasing `y`.
//!
//! # Why integers only? (for beginners)
//!
//! The relay recomputes transition zones every time a peer joins or leaves,
//! and every peer must agree on the result byte-for-byte.  Floating point
//! arithmetic can round differently between builds and CPUs; integer
//! arithmetic cannot.  Keeping geometry integral makes zone computation
//! deterministic.

use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point (or offset) in screen space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: i32,
    pub y: i32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Direction of an edge crossing, or of one rectangle relative to another.
///
/// `None` is a real value rather than `Option<Direction>` because it travels
/// on the wire inside zone descriptors and must have a stable encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
    #[default]
    None,
}

impl Direction {
    /// Returns the direction pointing the other way.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Right => Direction::Left,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::None => Direction::None,
        }
    }

    /// One-pixel step in this direction.
    pub fn unit(self) -> Vector2 {
        match self {
            Direction::Up => Vector2::new(0, -1),
            Direction::Right => Vector2::new(1, 0),
            Direction::Down => Vector2::new(0, 1),
            Direction::Left => Vector2::new(-1, 0),
            Direction::None => Vector2::ZERO,
        }
    }

    /// Returns `true` if a cursor movement of `delta` travels in this direction.
    ///
    /// Only the axis the direction lies on is inspected; diagonal movement
    /// towards the right still counts as moving `Right`.
    pub fn matches_motion(self, delta: Vector2) -> bool {
        match self {
            Direction::Up => delta.y < 0,
            Direction::Right => delta.x > 0,
            Direction::Down => delta.y > 0,
            Direction::Left => delta.x < 0,
            Direction::None => false,
        }
    }
}

/// An axis-aligned rectangle described by its four edges.
///
/// For display rectangles `right` and `bottom` are exclusive (a 1920-wide
/// display at x=0 has `right == 1920`).  Transition zones are degenerate
/// rectangles whose bounds are inclusive, which is what [`Rect::contains`]
/// tests against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Returns `true` if the point lies within the rectangle, edges included.
    pub fn contains(&self, point: Vector2) -> bool {
        point.x >= self.left
            && point.x <= self.right
            && point.y >= self.top
            && point.y <= self.bottom
    }

    /// Returns `true` if the interiors of the two rectangles intersect.
    ///
    /// Rectangles that merely share an edge do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.top < other.bottom
            && self.bottom > other.top
    }

    /// Returns the edge of `self` that `other` sits flush against.
    ///
    /// The rectangles must share a full edge line and overlap along it; corner
    /// contact alone yields [`Direction::None`].
    pub fn touching_edge(&self, other: &Rect) -> Direction {
        let vertical_overlap = self.top < other.bottom && self.bottom > other.top;
        let horizontal_overlap = self.left < other.right && self.right > other.left;

        if vertical_overlap && self.right == other.left {
            Direction::Right
        } else if vertical_overlap && self.left == other.right {
            Direction::Left
        } else if horizontal_overlap && self.bottom == other.top {
            Direction::Down
        } else if horizontal_overlap && self.top == other.bottom {
            Direction::Up
        } else {
            Direction::None
        }
    }

    /// Returns the rectangle moved by `offset`.
    pub fn translate(&self, offset: Vector2) -> Rect {
        Rect::new(
            self.left.saturating_add(offset.x),
            self.top.saturating_add(offset.y),
            self.right.saturating_add(offset.x),
            self.bottom.saturating_add(offset.y),
        )
    }

    /// Clamps `point` into the rectangle, edges included.
    pub fn clamp(&self, point: Vector2) -> Vector2 {
        Vector2::new(
            point.x.clamp(self.left, self.right.max(self.left)),
            point.y.clamp(self.top, self.bottom.max(self.top)),
        )
    }
}

/// Largest width or height accepted for a single monitor.
pub const MAX_DISPLAY_EXTENT: i32 = 1 << 16;

/// Largest absolute origin coordinate accepted for a monitor.
pub const MAX_DISPLAY_COORDINATE: i32 = 1 << 20;

/// Geometry of one monitor as reported by a peer, in that peer's local
/// display space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayBounds {
    pub position: Vector2,
    pub width: i32,
    pub height: i32,
}

impl DisplayBounds {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            position: Vector2::new(x, y),
            width,
            height,
        }
    }

    /// Returns `true` if the monitor has a positive size and every edge
    /// stays well inside `i32`.
    ///
    /// Bounds arrive from the network, so anything that fails this check
    /// must be rejected before it reaches the zone computation.
    pub fn is_valid(&self) -> bool {
        (1..=MAX_DISPLAY_EXTENT).contains(&self.width)
            && (1..=MAX_DISPLAY_EXTENT).contains(&self.height)
            && self.position.x.unsigned_abs() <= MAX_DISPLAY_COORDINATE as u32
            && self.position.y.unsigned_abs() <= MAX_DISPLAY_COORDINATE as u32
    }

    /// Right edge, exclusive.  Saturates instead of overflowing.
    pub fn right(&self) -> i32 {
        self.position.x.saturating_add(self.width)
    }

    /// Bottom edge, exclusive.  Saturates instead of overflowing.
    pub fn bottom(&self) -> i32 {
        self.position.y.saturating_add(self.height)
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.position.x, self.position.y, self.right(), self.bottom())
    }

    pub fn center(&self) -> Vector2 {
        Vector2::new(
            self.position.x.saturating_add(self.width / 2),
            self.position.y.saturating_add(self.height / 2),
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
