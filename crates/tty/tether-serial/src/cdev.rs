//! Character-device entry points.
//!
//! Each call carries a [`DeviceId`]; the unit bits select the manager
//! through the registry and the call-out bit selects the session.

use std::sync::Arc;

use tether_driver_api::DeviceId;
use tether_driver_api::terminal::{PollFlags, TtyRequest};

use crate::error::SessionError;
use crate::manager::{Caller, SerialManager};
use crate::registry::DeviceRegistry;

/// Dispatches device-node operations to the owning manager.
pub struct SerialSwitch {
    registry: Arc<DeviceRegistry<SerialManager>>,
}

impl SerialSwitch {
    /// Creates a switch over `registry`.
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry<SerialManager>>) -> Self {
        Self { registry }
    }

    fn resolve(&self, id: DeviceId) -> Result<Arc<SerialManager>, SessionError> {
        self.registry.resolve(id.unit()).ok_or_else(|| {
            log::debug!("tether: no manager for {id}");
            SessionError::NoDevice
        })
    }

    /// Opens the session behind `id`.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoDevice`] if no manager is bound to the unit,
    /// otherwise as [`SerialManager::open`].
    pub fn open(&self, id: DeviceId, caller: &Caller) -> Result<(), SessionError> {
        self.resolve(id)?.open(id.variant(), caller)
    }

    /// Closes the session behind `id`.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoDevice`] if no manager is bound to the unit,
    /// otherwise as [`SerialManager::close`].
    pub fn close(&self, id: DeviceId) -> Result<(), SessionError> {
        self.resolve(id)?.close(id.variant())
    }

    /// Reads from the session behind `id`.
    ///
    /// # Errors
    ///
    /// As [`SerialManager::read`].
    pub fn read(&self, id: DeviceId, buf: &mut [u8], nonblocking: bool) -> Result<usize, SessionError> {
        self.resolve(id)?.read(id.variant(), buf, nonblocking)
    }

    /// Writes to the session behind `id`.
    ///
    /// # Errors
    ///
    /// As [`SerialManager::write`].
    pub fn write(&self, id: DeviceId, buf: &[u8], nonblocking: bool) -> Result<usize, SessionError> {
        self.resolve(id)?.write(id.variant(), buf, nonblocking)
    }

    /// Issues a control request on the session behind `id`.
    ///
    /// # Errors
    ///
    /// As [`SerialManager::ioctl`].
    pub fn ioctl(&self, id: DeviceId, request: &mut TtyRequest) -> Result<(), SessionError> {
        self.resolve(id)?.ioctl(id.variant(), request)
    }

    /// Polls the session behind `id`.
    ///
    /// # Errors
    ///
    /// As [`SerialManager::poll`].
    pub fn poll(&self, id: DeviceId, events: PollFlags) -> Result<PollFlags, SessionError> {
        self.resolve(id)?.poll(id.variant(), events)
    }
}
