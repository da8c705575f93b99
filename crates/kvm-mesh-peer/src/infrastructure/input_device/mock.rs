//! Mock input device for tests and for hosts without a platform backend.
//!
//! Local events are scripted with [`MockInputDevice::push_local`]; injected
//! events and grab state are recorded for inspection.  Set `should_fail`
//! to exercise error paths in callers.  A device built with
//! [`MockInputDevice::attached_to`] also moves a mock display's cursor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kvm_mesh_core::InputEvent;

use super::{DeviceError, InputDevice};
use crate::infrastructure::display::mock::MockDisplayServer;

/// Records every call without touching the OS.
#[derive(Default)]
pub struct MockInputDevice {
    local: Mutex<VecDeque<InputEvent>>,
    /// Events injected through [`InputDevice::write_event`], in order.
    pub written: Mutex<Vec<InputEvent>>,
    grabbed: AtomicBool,
    closed: AtomicBool,
    /// When `true`, writes and grab changes fail with [`DeviceError::Platform`].
    pub should_fail: bool,
    pointer: Option<Arc<MockDisplayServer>>,
}

impl MockInputDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose injected motion moves `display`'s cursor.
    pub fn attached_to(display: Arc<MockDisplayServer>) -> Self {
        Self {
            pointer: Some(display),
            ..Self::default()
        }
    }

    /// Queues an event to be returned by the next `read_event`.
    pub fn push_local(&self, event: InputEvent) {
        lock(&self.local).push_back(event);
    }

    /// Makes every subsequent read fail with [`DeviceError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<InputEvent> {
        lock(&self.written).clone()
    }

    fn check(&self) -> Result<(), DeviceError> {
        if self.should_fail {
            Err(DeviceError::Platform("mock failure".into()))
        } else {
            Ok(())
        }
    }
}

impl InputDevice for MockInputDevice {
    fn read_event(&self, timeout: Duration) -> Result<Option<InputEvent>, DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        if let Some(event) = lock(&self.local).pop_front() {
            return Ok(Some(event));
        }
        std::thread::sleep(timeout.min(Duration::from_millis(10)));
        Ok(None)
    }

    fn write_event(&self, event: &InputEvent) -> Result<(), DeviceError> {
        self.check()?;
        lock(&self.written).push(*event);
        if let Some(display) = &self.pointer {
            display.apply(event);
        }
        Ok(())
    }

    fn grab(&self) -> Result<(), DeviceError> {
        self.check()?;
        self.grabbed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> Result<(), DeviceError> {
        self.check()?;
        self.grabbed.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
