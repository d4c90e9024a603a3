//! Collaborator contracts for the tether serial session manager.
//!
//! This crate defines the interfaces the session manager sits between:
//! the abstract [`PortDevice`](port::PortDevice) underneath, the generic
//! [`Terminal`](terminal::Terminal) above, and the
//! [`ManagedDevice`](lifecycle::ManagedDevice) hooks a host drives. It holds
//! no behaviour of its own beyond small value types.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod lifecycle;
pub mod port;
pub mod terminal;
pub mod termios;

pub use error::{DriverError, PortError, TtyError};
pub use id::{DeviceId, Variant};
pub use port::{PortCapabilities, PortCommand, PortDevice, PortState};
pub use terminal::{Terminal, TerminalHooks};
pub use termios::Termios;
