//! Serial-port session manager.
//!
//! Bridges generic [`Terminal`](tether_driver_api::Terminal)s to abstract
//! [`PortDevice`](tether_driver_api::PortDevice)s. Each port exposes two
//! sessions, dial-in and call-out, that compete for the one device:
//!
//! - a dial-in open waits for carrier unless it is non-blocking or local;
//! - a call-out open always succeeds once the port is free, and may preempt
//!   a dial-in session that has not completed its open or that allows it;
//! - exclusive mode locks out unprivileged opens of the active session.
//!
//! Once a session is fully open, a receive worker and a transmit worker move
//! data between the device and the terminal. The host supplies threads,
//! timers, terminals and device nodes through [`HostBinding`].

#![warn(missing_docs)]

mod arbitration;
mod baud;
mod cdev;
pub mod config;
pub mod error;
pub mod host;
mod lifecycle;
mod manager;
mod param;
pub mod registry;
mod rx;
mod session;
mod sync;
#[cfg(all(test, not(shuttle)))]
mod test_support;
mod tx;

pub use cdev::SerialSwitch;
pub use config::{ConfigError, SessionConfig};
pub use error::SessionError;
pub use host::{HostBinding, Task};
pub use manager::{Caller, Interrupt, SerialManager};
pub use registry::DeviceRegistry;
