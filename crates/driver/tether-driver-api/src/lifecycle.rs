//! Device lifecycle management trait.
//!
//! [`ManagedDevice`] carries the hooks a host calls as a device instance is
//! matched, detached, and hot-removed.

use crate::error::DriverError;

/// Result of a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateStatus {
    /// All resources were released before returning.
    Complete,
    /// Work is still in flight; the device reports completion later.
    Deferred,
}

/// Properties a host may set on a running device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    /// Block until the device has no active session and no open or close in
    /// progress.
    WaitForIdle,
}

/// Lifecycle trait for managed devices.
///
/// State machine: `Created → Started → Terminated → Stopped`.
pub trait ManagedDevice: Send + Sync {
    /// Starts the device: assigns identifiers and publishes nodes.
    ///
    /// # Errors
    ///
    /// [`DriverError::InitFailed`] if publication failed.
    fn start(&self) -> Result<(), DriverError>;

    /// Marks the device gone and tears down any active session.
    ///
    /// Returns [`TerminateStatus::Deferred`] when worker threads must still
    /// exit; completion is then reported to the host asynchronously.
    fn terminate(&self) -> TerminateStatus;

    /// Detaches from the transport after termination.
    fn stop(&self) {}

    /// Applies host-requested properties.
    ///
    /// # Errors
    ///
    /// [`DriverError::Unsupported`] by default.
    fn set_properties(&self, properties: &[Property]) -> Result<(), DriverError> {
        let _ = properties;
        Err(DriverError::Unsupported)
    }
}
