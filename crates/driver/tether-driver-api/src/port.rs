//! Abstract serial port device.
//!
//! [`PortDevice`] is the transport-facing half of the session manager: a
//! UART, a Bluetooth RFCOMM channel, or a USB-serial adapter each implement
//! it. The interface is a state-bit register that callers can watch for
//! changes, a command channel for line parameters, a receive queue that
//! interleaves bulk data with discrete events, and a transmit queue.
//!
//! All methods take `&self`; implementations synchronize internally because
//! the receive thread, the transmit thread, and caller threads use the same
//! device concurrently.

use core::time::Duration;

use bitflags::bitflags;

use crate::error::PortError;

// ---------------------------------------------------------------------------
// State bits
// ---------------------------------------------------------------------------

bitflags! {
    /// Device state register.
    ///
    /// The low half carries queue and software-event bits, the high half
    /// mirrors the RS-232 signal lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PortState: u32 {
        /// The port has been acquired by a client.
        const ACQUIRED       = 1 << 0;
        /// The port is active; clearing this wakes every blocked wait.
        const ACTIVE         = 1 << 1;
        /// Transmitter enabled.
        const TX_ENABLE      = 1 << 2;
        /// Receiver enabled.
        const RX_ENABLE      = 1 << 3;
        /// The transmitter is shifting bits out.
        const TX_BUSY        = 1 << 4;
        /// Transmit queue is empty.
        const TXQ_EMPTY      = 1 << 5;
        /// Transmit queue is at or below its low-water mark.
        const TXQ_LOW_WATER  = 1 << 6;
        /// Transmit queue is at or above its high-water mark.
        const TXQ_HIGH_WATER = 1 << 7;
        /// Transmit queue is full.
        const TXQ_FULL       = 1 << 8;
        /// Receive queue is empty.
        const RXQ_EMPTY      = 1 << 9;
        /// Receive queue is full.
        const RXQ_FULL       = 1 << 10;
        /// Software "receive side may proceed" event.
        const RX_EVENT       = 1 << 11;
        /// Software "transmit side has work" event.
        const TX_EVENT       = 1 << 12;

        /// Data Carrier Detect.
        const CAR            = 1 << 16;
        /// Clear To Send.
        const CTS            = 1 << 17;
        /// Data Set Ready.
        const DSR            = 1 << 18;
        /// Ring Indicator.
        const RI             = 1 << 19;
        /// Data Terminal Ready (output).
        const DTR            = 1 << 20;
        /// Request To Send (output).
        const RTS            = 1 << 21;
        /// A line break is being transmitted.
        const BREAK          = 1 << 22;
    }
}

bitflags! {
    /// Flow-control mechanisms enabled on the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FlowControl: u32 {
        /// Honour received XON/XOFF to gate transmission.
        const TX_XON_XOFF  = 1 << 0;
        /// Any received byte restarts transmission stopped by XOFF.
        const XANY         = 1 << 1;
        /// Send XON/XOFF to throttle the remote transmitter.
        const RX_XON_XOFF  = 1 << 2;
        /// Drive RTS from receive-queue occupancy.
        const RTS_INPUT    = 1 << 3;
        /// Gate transmission on CTS.
        const CTS_OUTPUT   = 1 << 4;
        /// Drive DTR from receive-queue occupancy.
        const DTR_INPUT    = 1 << 5;
        /// Gate transmission on DSR.
        const DSR_OUTPUT   = 1 << 6;

        /// Software (in-band) flow control.
        const SOFTWARE = Self::TX_XON_XOFF.bits() | Self::XANY.bits() | Self::RX_XON_XOFF.bits();
        /// Hardware (signal line) flow control.
        const HARDWARE = Self::RTS_INPUT.bits()
            | Self::CTS_OUTPUT.bits()
            | Self::DTR_INPUT.bits()
            | Self::DSR_OUTPUT.bits();
    }
}

bitflags! {
    /// Transport properties the session manager may need to know about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PortCapabilities: u32 {
        /// The transport can leave its device node behind after removal
        /// without signalling carrier loss; the session manager synthesizes
        /// a hang-up when its workers exit.
        const STALE_NODE_ON_REMOVAL = 1 << 0;
        /// The transport accepts an external clock multiplier.
        const EXTERNAL_CLOCK        = 1 << 1;
    }
}

// ---------------------------------------------------------------------------
// Line parameters
// ---------------------------------------------------------------------------

/// Parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

/// Receive latency mode negotiated for packet line disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMode {
    /// Deliver promptly whenever this byte arrives (a frame delimiter).
    SpecialByte(u8),
    /// Deliver promptly on any byte.
    AnyByte,
}

/// Commands executed on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCommand {
    /// Activate or deactivate the port. Deactivation wakes every blocked
    /// wait with [`PortError::Offline`].
    Activate(bool),
    /// Data rate in half-bits per second, so 134.5 baud is representable.
    DataRate(u32),
    /// Run from the external clock with the given multiplier.
    ExternalClock(u32),
    /// Character size in bits (5..=8).
    DataSize(u8),
    /// Parity generation and checking.
    Parity(Parity),
    /// Stop bits.
    StopBits(StopBits),
    /// Replace the enabled flow-control mechanisms.
    FlowControl(FlowControl),
    /// Character that resumes transmission.
    XonChar(u8),
    /// Character that suspends transmission.
    XoffChar(u8),
    /// Enable or disable the transmitter.
    TransmitEnable(bool),
    /// Enable or disable the receiver.
    ReceiveEnable(bool),
    /// Start or stop sending a line break.
    LineBreak(bool),
    /// Receive latency mode.
    Latency(LatencyMode),
    /// Maximum receive latency in microseconds.
    DataLatency(u32),
    /// Discard queued transmit data.
    FlushTx,
    /// Discard queued receive data.
    FlushRx,
}

/// Snapshot of the device's current line parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineParams {
    /// Data rate in half-bits per second.
    pub data_rate: u32,
    /// Character size in bits.
    pub data_size: u8,
    /// Parity setting.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Enabled flow-control mechanisms.
    pub flow_control: FlowControl,
    /// XON character.
    pub xon: u8,
    /// XOFF character.
    pub xoff: u8,
}

impl Default for LineParams {
    fn default() -> Self {
        Self {
            data_rate: 9600 << 1,
            data_size: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::empty(),
            xon: 0x11,
            xoff: 0x13,
        }
    }
}

// ---------------------------------------------------------------------------
// Receive events
// ---------------------------------------------------------------------------

/// Discrete receive-queue events interleaved with bulk data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    /// The negotiated special byte arrived.
    SpecialByte(u8),
    /// A line break was received.
    LineBreak,
    /// A byte arrived with a framing error.
    FramingError(u8),
    /// A byte arrived with a parity error.
    ParityError(u8),
    /// The hardware FIFO overflowed.
    HardwareOverrun,
    /// The driver's receive queue overflowed.
    SoftwareOverrun,
    /// Transport-specific event code the session manager does not interpret.
    Other(u32),
}

// ---------------------------------------------------------------------------
// PortDevice
// ---------------------------------------------------------------------------

/// Interface trait for abstract serial port devices.
///
/// Blocking calls return [`PortError::Offline`] once the port is
/// deactivated, so a client can always unblock its own threads by executing
/// [`PortCommand::Activate`]`(false)`.
pub trait PortDevice: Send + Sync {
    /// Acquires exclusive use of the port.
    ///
    /// # Errors
    ///
    /// [`PortError::Busy`] if another client holds the port and `sleep` is
    /// `false`.
    fn acquire_port(&self, sleep: bool) -> Result<(), PortError>;

    /// Releases the port and deactivates it.
    ///
    /// # Errors
    ///
    /// [`PortError::NotOpen`] if the port was not acquired.
    fn release_port(&self) -> Result<(), PortError>;

    /// Returns the current state register.
    fn state(&self) -> PortState;

    /// Sets the bits of `mask` to their values in `state`.
    ///
    /// # Errors
    ///
    /// [`PortError::NotOpen`] if the port is not acquired.
    fn set_state(&self, state: PortState, mask: PortState) -> Result<(), PortError>;

    /// Blocks until at least one bit selected by `mask` has the value it has
    /// in `wanted`, then returns the full state register.
    ///
    /// # Errors
    ///
    /// [`PortError::Offline`] when the port is deactivated,
    /// [`PortError::Timeout`] when `timeout` elapses first.
    fn watch_state(
        &self,
        wanted: PortState,
        mask: PortState,
        timeout: Option<Duration>,
    ) -> Result<PortState, PortError>;

    /// Executes a command.
    ///
    /// # Errors
    ///
    /// [`PortError::BadArgument`] for unsupported parameter values.
    fn execute(&self, command: PortCommand) -> Result<(), PortError>;

    /// Returns the current line parameters.
    ///
    /// # Errors
    ///
    /// [`PortError::NotOpen`] if the port is not acquired.
    fn line_params(&self) -> Result<LineParams, PortError>;

    /// Returns the kind of the next receive-queue entry without removing it,
    /// or `None` when the next entry is plain data (or the queue is empty).
    fn next_event(&self) -> Option<RxEvent>;

    /// Removes the next discrete event from the receive queue.
    ///
    /// # Errors
    ///
    /// [`PortError::Offline`] when the port is deactivated while waiting.
    fn dequeue_event(&self, sleep: bool) -> Result<RxEvent, PortError>;

    /// Dequeues up to `buf.len()` bytes, blocking until at least `min` are
    /// available. Returns early (possibly with zero bytes) when a discrete
    /// event reaches the head of the queue, so data never skips past one.
    ///
    /// # Errors
    ///
    /// [`PortError::Offline`] when the port is deactivated while waiting.
    fn dequeue_data(&self, buf: &mut [u8], min: usize) -> Result<usize, PortError>;

    /// Returns how many bytes the transmit queue can accept right now.
    ///
    /// # Errors
    ///
    /// [`PortError::NotOpen`] if the port is not acquired.
    fn tx_capacity(&self) -> Result<usize, PortError>;

    /// Enqueues bytes for transmission, returning how many were accepted.
    ///
    /// # Errors
    ///
    /// [`PortError::Offline`] when the port is deactivated while waiting.
    fn enqueue_data(&self, buf: &[u8], sleep: bool) -> Result<usize, PortError>;

    /// Returns the transport's capability flags.
    fn capabilities(&self) -> PortCapabilities {
        PortCapabilities::empty()
    }
}
