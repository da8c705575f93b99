//! Input device adapter: the peer's keyboard and mouse.
//!
//! The agent needs four things from the OS input stack: read the next local
//! event, inject an event through a virtual device, and grab or release
//! exclusive access to the physical devices while input is being forwarded.
//! Those are captured by the narrow, synchronous [`InputDevice`] trait.
//!
//! Platform backends (evdev + uinput on Linux, for instance) live outside
//! this crate's core; [`mock::MockInputDevice`] is always compiled so the
//! agent runs and tests anywhere.
//!
//! # Why is `read_event` bounded? (for beginners)
//!
//! Reading a device blocks the calling thread until the user touches a key.
//! A thread stuck in such a read cannot notice that the process is shutting
//! down.  Every read therefore takes a timeout and returns `Ok(None)` when it
//! expires, so [`pump_local_input`] can check its cancellation token between
//! reads.

pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use kvm_mesh_core::InputEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::handle_focus::AgentEvent;

/// Upper bound on one blocking device read.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Error type for device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The OS rejected the operation.
    #[error("input device error: {0}")]
    Platform(String),

    /// The device went away (unplugged, or the mock was closed).
    #[error("input device closed")]
    Closed,
}

/// A local keyboard/mouse plus a virtual device for injected events.
#[cfg_attr(test, mockall::automock)]
pub trait InputDevice: Send + Sync {
    /// Blocks for at most `timeout` waiting for the next local event.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the device failed or was closed.
    fn read_event(&self, timeout: Duration) -> Result<Option<InputEvent>, DeviceError>;

    /// Injects `event` through the virtual device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Platform`] if the OS rejects the write.
    fn write_event(&self, event: &InputEvent) -> Result<(), DeviceError>;

    /// Takes exclusive access to the physical devices.
    fn grab(&self) -> Result<(), DeviceError>;

    /// Gives exclusive access back to the OS.
    fn release(&self) -> Result<(), DeviceError>;
}

/// Reads local events on a blocking thread and feeds them to the agent.
///
/// Stops when `cancel` fires, the agent's queue closes, or the device fails.
pub fn pump_local_input(
    device: Arc<dyn InputDevice>,
    events: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !cancel.is_cancelled() {
            match device.read_event(READ_TIMEOUT) {
                Ok(Some(event)) => {
                    if events.blocking_send(AgentEvent::Local(event)).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(DeviceError::Closed) => {
                    debug!("input device closed; local input pump stopped");
                    break;
                }
                Err(e) => {
                    warn!("local input pump stopped: {e}");
                    break;
                }
            }
        }
    })
}
