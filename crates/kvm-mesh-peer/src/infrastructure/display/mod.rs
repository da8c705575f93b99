//! Display adapter: cursor position and monitor enumeration.
//!
//! The agent reports its monitors to the relay in `Connect` and samples the
//! cursor position on every watch tick.  Both are answered by a
//! [`DisplayServer`].  [`mock::MockDisplayServer`] is always compiled so the
//! agent runs on machines without a supported windowing backend.

pub mod mock;

use kvm_mesh_core::{DisplayBounds, Vector2};
use thiserror::Error;

/// Error type for display queries.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// The windowing system API call failed.
    #[error("display query failed: {0}")]
    Platform(String),
}

/// Read-only view of the local windowing system.
#[cfg_attr(test, mockall::automock)]
pub trait DisplayServer: Send + Sync {
    /// Current cursor position in local display space.
    fn cursor_position(&self) -> Result<Vector2, DisplayError>;

    /// All connected monitors in local display space, primary first.
    fn displays(&self) -> Result<Vec<DisplayBounds>, DisplayError>;
}
