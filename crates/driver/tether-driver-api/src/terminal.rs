//! Generic terminal contract.
//!
//! A [`Terminal`] owns the line discipline, the input and output queues and
//! the user-visible read/write/ioctl semantics. The session manager drives it
//! from below (feeding received bytes, pulling queued output, reporting
//! carrier) and receives callbacks through [`TerminalHooks`].

use bitflags::bitflags;

use crate::error::TtyError;
use crate::termios::{ModemBits, Termios};

bitflags! {
    /// Terminal state flags visible to the session manager.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TtyState: u32 {
        /// The terminal is open.
        const ISOPEN     = 1 << 0;
        /// Carrier is present (or the line is local).
        const CARR_ON    = 1 << 1;
        /// Exclusive-use mode is set.
        const XCLUDE     = 1 << 2;
        /// Output is in progress.
        const BUSY       = 1 << 3;
        /// Output is stopped by flow control.
        const TTSTOP     = 1 << 4;
        /// Received bytes may bypass per-character input processing.
        const CAN_BYPASS = 1 << 5;
    }
}

bitflags! {
    /// Error qualifiers attached to a received character.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharError: u32 {
        /// The byte was received with a framing error (or is a BREAK).
        const FRAMING = 1 << 0;
        /// The byte was received with a parity error.
        const PARITY  = 1 << 1;
    }
}

bitflags! {
    /// Readiness conditions for [`Terminal::poll`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollFlags: u32 {
        /// Input is available.
        const READABLE = 1 << 0;
        /// Output space is available.
        const WRITABLE = 1 << 1;
        /// The line has hung up.
        const HANGUP   = 1 << 2;
    }
}

/// Line discipline currently attached to a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineDiscipline {
    /// Standard termios processing.
    #[default]
    Termios,
    /// Serial Line IP framing.
    Slip,
    /// Point-to-Point Protocol framing.
    Ppp,
    /// Any other discipline, by number.
    Other(u8),
}

/// Control requests accepted by the character-device ioctl entry point.
///
/// Requests carrying an output value are filled in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtyRequest {
    /// Read the current settings.
    GetAttr(Termios),
    /// Replace the current settings.
    SetAttr(Termios),
    /// Start sending a break.
    SetBreak,
    /// Stop sending a break.
    ClearBreak,
    /// Raise DTR.
    SetDtr,
    /// Drop DTR.
    ClearDtr,
    /// Read the modem-control bits.
    ModemGet(ModemBits),
    /// Replace the modem-control bits.
    ModemSet(ModemBits),
    /// Raise the given modem-control bits.
    ModemBis(ModemBits),
    /// Drop the given modem-control bits.
    ModemBic(ModemBits),
    /// Enter exclusive-use mode.
    Exclusive,
    /// Leave exclusive-use mode.
    NonExclusive,
    /// Allow or forbid preemption of this port's dial-in session.
    SetPreempt(bool),
    /// Set the maximum receive latency in microseconds.
    SetDataLatency(u32),
    /// Set an arbitrary speed in baud.
    SetSpeed(u32),
    /// Read the settings applied when the session is next opened.
    GetInitial(Termios),
    /// Replace the settings applied when the session is next opened.
    SetInitial(Termios),
    /// Any other request, passed through by number.
    Other(u32),
}

/// Callbacks from the terminal into the session manager.
pub trait TerminalHooks: Send + Sync {
    /// Output has been queued; start transmitting.
    fn start_output(&self);

    /// Stop transmitting, discarding queued device output when `flush` is set.
    fn stop_output(&self, flush: bool);

    /// New settings are about to take effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the settings; the terminal then
    /// keeps its previous settings.
    fn reconfigure(&self, termios: &Termios) -> Result<(), TtyError>;
}

/// A character terminal the session manager drives.
///
/// Implementations synchronize internally; every method may be called from
/// the receive worker, the transmit worker, a timer callback, and caller
/// threads concurrently.
pub trait Terminal: Send + Sync {
    /// Returns the current state flags.
    fn state(&self) -> TtyState;

    /// Sets the flags in `set` and clears the flags in `clear`.
    fn update_state(&self, set: TtyState, clear: TtyState);

    /// Returns the current settings.
    fn termios(&self) -> Termios;

    /// Stores settings without invoking [`TerminalHooks::reconfigure`].
    fn store_termios(&self, termios: &Termios);

    /// Returns the attached line discipline.
    fn line_discipline(&self) -> LineDiscipline;

    /// Performs the generic open: marks the terminal open and resets queues.
    ///
    /// # Errors
    ///
    /// Returns [`TtyError::Busy`] when exclusive use forbids another open.
    fn open(&self) -> Result<(), TtyError>;

    /// Performs the generic close: flushes the queues and detaches readers.
    fn close(&self);

    /// Reads processed input.
    ///
    /// # Errors
    ///
    /// [`TtyError::WouldBlock`] when `nonblocking` and no input is ready.
    fn read(&self, buf: &mut [u8], nonblocking: bool) -> Result<usize, TtyError>;

    /// Queues output for transmission.
    ///
    /// # Errors
    ///
    /// [`TtyError::WouldBlock`] when `nonblocking` and the output queue is full.
    fn write(&self, buf: &[u8], nonblocking: bool) -> Result<usize, TtyError>;

    /// Handles a generic terminal request.
    ///
    /// # Errors
    ///
    /// [`TtyError::NotTty`] for requests the terminal does not understand.
    fn ioctl(&self, request: &mut TtyRequest) -> Result<(), TtyError>;

    /// Returns which of `events` are currently ready.
    fn poll(&self, events: PollFlags) -> PollFlags;

    /// Feeds one received byte through the line discipline.
    fn receive_char(&self, byte: u8, error: CharError);

    /// Appends bytes to the raw input queue, bypassing the line discipline.
    /// Returns the number of bytes accepted.
    fn receive_raw(&self, bytes: &[u8]) -> usize;

    /// Wakes readers after raw input.
    fn wake_readers(&self);

    /// Number of bytes waiting in the input queue.
    fn input_queued(&self) -> usize;

    /// Input-queue fill level above which the receiver must throttle.
    fn input_high_water(&self) -> usize;

    /// Number of bytes waiting in the output queue.
    fn output_queued(&self) -> usize;

    /// Moves up to `buf.len()` queued output bytes into `buf`.
    fn take_output(&self, buf: &mut [u8]) -> usize;

    /// Reports a carrier transition. Returns `false` when the line discipline
    /// wants the line hung up (DTR dropped).
    fn modem_changed(&self, carrier: bool) -> bool;

    /// Wakes writers blocked on a full output queue.
    fn wake_writers(&self);

    /// Notifies the line discipline that the transmitter went idle.
    fn transmit_complete(&self);

    /// Wakes every thread sleeping on this terminal.
    fn wake_all(&self);
}
