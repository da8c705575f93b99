//! Mock display server with a settable cursor.
//!
//! Relative motion written through an attached
//! [`MockInputDevice`](crate::infrastructure::input_device::mock::MockInputDevice)
//! moves the cursor, clamped to the monitors' bounding box, the way a real
//! pointer would.

use std::sync::{Mutex, PoisonError};

use kvm_mesh_core::protocol::messages::{event_code, event_type};
use kvm_mesh_core::{DisplayBounds, InputEvent, Rect, Vector2};

use super::{DisplayError, DisplayServer};

pub struct MockDisplayServer {
    displays: Vec<DisplayBounds>,
    cursor: Mutex<Vector2>,
}

impl MockDisplayServer {
    pub fn new(displays: Vec<DisplayBounds>) -> Self {
        Self {
            displays,
            cursor: Mutex::new(Vector2::ZERO),
        }
    }

    /// A single 1920×1080 monitor at the origin.
    pub fn single_1080p() -> Self {
        Self::new(vec![DisplayBounds::new(0, 0, 1920, 1080)])
    }

    pub fn set_cursor(&self, pos: Vector2) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = pos;
    }

    /// Moves the cursor for `EV_REL` X/Y events; anything else is ignored.
    pub fn apply(&self, event: &InputEvent) {
        if event.kind != event_type::EV_REL {
            return;
        }
        let delta = match event.code {
            event_code::REL_X => Vector2::new(event.value, 0),
            event_code::REL_Y => Vector2::new(0, event.value),
            _ => return,
        };
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let moved = *cursor + delta;
        *cursor = match self.pointer_area() {
            Some(area) => area.clamp(moved),
            None => moved,
        };
    }

    /// Positions the pointer can reach: the monitors' bounding box with
    /// exclusive edges pulled in by one pixel.
    fn pointer_area(&self) -> Option<Rect> {
        self.displays
            .iter()
            .map(|d| Rect::new(d.position.x, d.position.y, d.right() - 1, d.bottom() - 1))
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

impl DisplayServer for MockDisplayServer {
    fn cursor_position(&self) -> Result<Vector2, DisplayError> {
        Ok(*self.cursor.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn displays(&self) -> Result<Vec<DisplayBounds>, DisplayError> {
        Ok(self.displays.clone())
    }
}
