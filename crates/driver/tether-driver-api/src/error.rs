//! Error types shared by the collaborator contracts.
//!
//! Each layer gets its own small error vocabulary: [`PortError`] for the
//! abstract port device, [`TtyError`] for the terminal layer, and
//! [`DriverError`] for lifecycle hooks. The session manager converts all of
//! them into its own taxonomy.

use core::fmt;

/// Outcomes reported by a [`PortDevice`](crate::port::PortDevice).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// The port has been deactivated (closed, preempted, or removed).
    Offline,
    /// The port has not been acquired by this client.
    NotOpen,
    /// The port is held by another client.
    Busy,
    /// A parameter or command argument was rejected.
    BadArgument,
    /// A blocking wait was interrupted.
    Interrupted,
    /// A blocking wait ran out of time.
    Timeout,
    /// The command is not implemented by this transport.
    Unsupported,
    /// The transport failed unexpectedly.
    IoError,
}

impl PortError {
    /// Returns `true` for the soft outcomes that are expected while a port
    /// is being torn down.
    #[must_use]
    pub const fn is_offline(self) -> bool {
        matches!(self, Self::Offline | Self::NotOpen)
    }
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("port offline"),
            Self::NotOpen => f.write_str("port not open"),
            Self::Busy => f.write_str("port busy"),
            Self::BadArgument => f.write_str("bad argument"),
            Self::Interrupted => f.write_str("wait interrupted"),
            Self::Timeout => f.write_str("wait timed out"),
            Self::Unsupported => f.write_str("operation not supported"),
            Self::IoError => f.write_str("I/O error"),
        }
    }
}

impl core::error::Error for PortError {}

/// Failures reported by a [`Terminal`](crate::terminal::Terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtyError {
    /// A non-blocking call found nothing to do.
    WouldBlock,
    /// The caller was interrupted while sleeping.
    Interrupted,
    /// Malformed request.
    InvalidArgument,
    /// The request is not a terminal request.
    NotTty,
    /// The device behind the terminal is gone.
    NoDevice,
    /// The device behind the terminal cannot service the request right now.
    Offline,
    /// Exclusive-use or arbitration conflict.
    Busy,
    /// Unexpected I/O failure.
    Io,
}

impl fmt::Display for TtyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => f.write_str("operation would block"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NotTty => f.write_str("inappropriate ioctl for device"),
            Self::NoDevice => f.write_str("no such device"),
            Self::Offline => f.write_str("device offline"),
            Self::Busy => f.write_str("device busy"),
            Self::Io => f.write_str("I/O error"),
        }
    }
}

impl core::error::Error for TtyError {}

/// Errors returned from lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The device was not found or has been removed.
    DeviceNotFound,
    /// Start-up failed.
    InitFailed,
    /// The requested property or operation is not supported.
    Unsupported,
    /// The driver is not in a valid state for this operation.
    InvalidState,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound => f.write_str("device not found"),
            Self::InitFailed => f.write_str("driver initialization failed"),
            Self::Unsupported => f.write_str("operation not supported"),
            Self::InvalidState => f.write_str("invalid driver state"),
        }
    }
}

impl core::error::Error for DriverError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_port_errors() {
        assert_eq!(format!("{}", PortError::Offline), "port offline");
        assert_eq!(format!("{}", PortError::NotOpen), "port not open");
        assert_eq!(format!("{}", PortError::Busy), "port busy");
        assert_eq!(format!("{}", PortError::IoError), "I/O error");
    }

    #[test]
    fn offline_classification() {
        assert!(PortError::Offline.is_offline());
        assert!(PortError::NotOpen.is_offline());
        assert!(!PortError::IoError.is_offline());
        assert!(!PortError::Busy.is_offline());
    }

    #[test]
    fn display_tty_and_driver_errors() {
        assert_eq!(
            format!("{}", TtyError::NotTty),
            "inappropriate ioctl for device"
        );
        assert_eq!(
            format!("{}", DriverError::DeviceNotFound),
            "device not found"
        );
        assert_eq!(
            format!("{}", DriverError::InvalidState),
            "invalid driver state"
        );
    }
}
