//! Session-level error taxonomy.

use core::fmt;

use tether_driver_api::{PortError, TtyError};

/// Errors returned by session-manager entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The device is gone or the identifier resolves to nothing.
    NoDevice,
    /// The port is held by another session, or this session was preempted.
    Busy,
    /// A parameter was rejected.
    InvalidArgument,
    /// The session has no device behind it right now.
    Offline,
    /// The port has not been acquired.
    NotOpen,
    /// The device failed unexpectedly.
    Io,
    /// A blocking wait was interrupted.
    Interrupted,
    /// The session is not open.
    BadDescriptor,
    /// A non-blocking call found nothing to do.
    WouldBlock,
    /// The request is not a terminal request.
    NotTty,
    /// The operation is not supported by this device.
    Unsupported,
}

impl SessionError {
    /// Returns the conventional (BSD) error number for this error.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::Interrupted => 4,
            Self::Offline | Self::NotOpen | Self::Io => 5,
            Self::NoDevice => 6,
            Self::BadDescriptor => 9,
            Self::Busy => 16,
            Self::InvalidArgument => 22,
            Self::NotTty => 25,
            Self::WouldBlock => 35,
            Self::Unsupported => 45,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => f.write_str("no such device"),
            Self::Busy => f.write_str("device busy"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::Offline => f.write_str("device offline"),
            Self::NotOpen => f.write_str("device not open"),
            Self::Io => f.write_str("I/O error"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::BadDescriptor => f.write_str("bad descriptor"),
            Self::WouldBlock => f.write_str("operation would block"),
            Self::NotTty => f.write_str("inappropriate ioctl for device"),
            Self::Unsupported => f.write_str("operation not supported"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<PortError> for SessionError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Offline => Self::Offline,
            PortError::NotOpen => Self::NotOpen,
            PortError::Busy => Self::Busy,
            PortError::BadArgument => Self::InvalidArgument,
            PortError::Interrupted => Self::Interrupted,
            PortError::Unsupported => Self::Unsupported,
            PortError::Timeout | PortError::IoError => Self::Io,
        }
    }
}

impl From<TtyError> for SessionError {
    fn from(err: TtyError) -> Self {
        match err {
            TtyError::WouldBlock => Self::WouldBlock,
            TtyError::Interrupted => Self::Interrupted,
            TtyError::InvalidArgument => Self::InvalidArgument,
            TtyError::NotTty => Self::NotTty,
            TtyError::NoDevice => Self::NoDevice,
            TtyError::Offline => Self::Offline,
            TtyError::Busy => Self::Busy,
            TtyError::Io => Self::Io,
        }
    }
}

impl From<SessionError> for TtyError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::WouldBlock => Self::WouldBlock,
            SessionError::Interrupted => Self::Interrupted,
            SessionError::InvalidArgument => Self::InvalidArgument,
            SessionError::NotTty | SessionError::Unsupported => Self::NotTty,
            SessionError::NoDevice | SessionError::BadDescriptor => Self::NoDevice,
            SessionError::Offline | SessionError::NotOpen => Self::Offline,
            SessionError::Busy => Self::Busy,
            SessionError::Io => Self::Io,
        }
    }
}
