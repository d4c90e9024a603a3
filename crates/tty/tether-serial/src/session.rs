//! Per-variant session state.
//!
//! Each manager owns exactly two sessions, dial-in and call-out. A session
//! carries its terminal (created on the first open attempt), a sticky error
//! that short-circuits device calls once the session has been preempted or
//! taken offline, and the settings applied on its next open.

use std::sync::{Arc, Weak};

use tether_driver_api::terminal::TtyState;
use tether_driver_api::termios::ControlFlags;
use tether_driver_api::{Terminal, TerminalHooks, Termios, TtyError, Variant};

use crate::error::SessionError;
use crate::manager::SerialManager;
use crate::sync::{Mutex, lock};

pub(crate) struct Session {
    variant: Variant,
    terminal: Mutex<Option<Arc<dyn Terminal>>>,
    /// Leaf lock; never held across another acquisition.
    error: Mutex<Option<SessionError>>,
    initial: Mutex<Termios>,
}

impl Session {
    pub(crate) fn new(variant: Variant, speed: u32) -> Self {
        Self {
            variant,
            terminal: Mutex::new(None),
            error: Mutex::new(None),
            initial: Mutex::new(initial_termios(variant, speed)),
        }
    }

    pub(crate) fn variant(&self) -> Variant {
        self.variant
    }

    pub(crate) fn terminal(&self) -> Option<Arc<dyn Terminal>> {
        lock(&self.terminal).clone()
    }

    /// Returns the session's terminal, constructing it with `create` on
    /// first use.
    pub(crate) fn terminal_or_create(
        &self,
        create: impl FnOnce() -> Result<Arc<dyn Terminal>, SessionError>,
    ) -> Result<Arc<dyn Terminal>, SessionError> {
        let mut slot = lock(&self.terminal);
        if let Some(tty) = slot.as_ref() {
            return Ok(Arc::clone(tty));
        }
        let tty = create()?;
        *slot = Some(Arc::clone(&tty));
        Ok(tty)
    }

    pub(crate) fn error(&self) -> Option<SessionError> {
        *lock(&self.error)
    }

    pub(crate) fn set_error(&self, err: SessionError) {
        *lock(&self.error) = Some(err);
    }

    pub(crate) fn clear_error(&self) {
        *lock(&self.error) = None;
    }

    pub(crate) fn initial(&self) -> Termios {
        *lock(&self.initial)
    }

    pub(crate) fn set_initial(&self, termios: &Termios) {
        *lock(&self.initial) = *termios;
    }

    /// Returns `true` if the terminal exists and is open.
    pub(crate) fn is_open(&self) -> bool {
        self.terminal()
            .is_some_and(|tty| tty.state().contains(TtyState::ISOPEN))
    }
}

/// Settings a session starts from: 8 data bits with the receiver on and
/// hang-up on close, plus local mode for call-out.
fn initial_termios(variant: Variant, speed: u32) -> Termios {
    let mut cflag = ControlFlags::CS8 | ControlFlags::CREAD | ControlFlags::HUPCL;
    if variant == Variant::CallOut {
        cflag |= ControlFlags::CLOCAL;
    }
    Termios::with_cflag(cflag, speed)
}

/// Terminal callbacks routed back to the owning manager.
pub(crate) struct SessionHooks {
    pub(crate) manager: Weak<SerialManager>,
    pub(crate) variant: Variant,
}

impl TerminalHooks for SessionHooks {
    fn start_output(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.start_output(self.variant);
        }
    }

    fn stop_output(&self, flush: bool) {
        if let Some(manager) = self.manager.upgrade() {
            manager.stop_output(self.variant, flush);
        }
    }

    fn reconfigure(&self, termios: &Termios) -> Result<(), TtyError> {
        let manager = self.manager.upgrade().ok_or(TtyError::NoDevice)?;
        manager
            .apply_parameters(self.variant, termios)
            .map_err(TtyError::from)
    }
}
