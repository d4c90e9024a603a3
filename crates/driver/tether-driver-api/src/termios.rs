//! Terminal line settings.
//!
//! Flag values follow the BSD `termios` layout so settings round-trip
//! unchanged through hosts that speak it.

use bitflags::bitflags;

bitflags! {
    /// Input modes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputFlags: u32 {
        /// Ignore BREAK conditions.
        const IGNBRK  = 0x0000_0001;
        /// Map BREAK to an interrupt.
        const BRKINT  = 0x0000_0002;
        /// Ignore bytes with parity errors.
        const IGNPAR  = 0x0000_0004;
        /// Mark parity and framing errors in the input stream.
        const PARMRK  = 0x0000_0008;
        /// Enable input parity checking.
        const INPCK   = 0x0000_0010;
        /// Strip the eighth bit.
        const ISTRIP  = 0x0000_0020;
        /// Map NL to CR on input.
        const INLCR   = 0x0000_0040;
        /// Ignore CR.
        const IGNCR   = 0x0000_0080;
        /// Map CR to NL on input.
        const ICRNL   = 0x0000_0100;
        /// Enable output flow control (honour XON/XOFF).
        const IXON    = 0x0000_0200;
        /// Enable input flow control (send XON/XOFF).
        const IXOFF   = 0x0000_0400;
        /// Any character restarts stopped output.
        const IXANY   = 0x0000_0800;
        /// Ring the bell when the input queue fills.
        const IMAXBEL = 0x0000_2000;
    }
}

bitflags! {
    /// Output modes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OutputFlags: u32 {
        /// Enable output processing.
        const OPOST = 0x0000_0001;
        /// Map NL to CR-NL on output.
        const ONLCR = 0x0000_0002;
    }
}

bitflags! {
    /// Control modes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlFlags: u32 {
        /// Character size mask.
        const CSIZE      = 0x0000_0300;
        /// 5-bit characters.
        const CS5        = 0x0000_0000;
        /// 6-bit characters.
        const CS6        = 0x0000_0100;
        /// 7-bit characters.
        const CS7        = 0x0000_0200;
        /// 8-bit characters.
        const CS8        = 0x0000_0300;
        /// Two stop bits.
        const CSTOPB     = 0x0000_0400;
        /// Enable the receiver.
        const CREAD      = 0x0000_0800;
        /// Parity enable.
        const PARENB     = 0x0000_1000;
        /// Odd parity.
        const PARODD     = 0x0000_2000;
        /// Hang up on last close.
        const HUPCL      = 0x0000_4000;
        /// Ignore modem status lines.
        const CLOCAL     = 0x0000_8000;
        /// CTS gates output.
        const CCTS_OFLOW = 0x0001_0000;
        /// RTS reflects input room.
        const CRTS_IFLOW = 0x0002_0000;
        /// DTR reflects input room.
        const CDTR_IFLOW = 0x0004_0000;
        /// DSR gates output.
        const CDSR_OFLOW = 0x0008_0000;
        /// DCD gates output.
        const CCAR_OFLOW = 0x0010_0000;

        /// Both RTS/CTS directions.
        const CRTSCTS = Self::CCTS_OFLOW.bits() | Self::CRTS_IFLOW.bits();
    }
}

bitflags! {
    /// Local modes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LocalFlags: u32 {
        /// Visual erase for line kill.
        const ECHOKE  = 0x0000_0001;
        /// Visually erase characters.
        const ECHOE   = 0x0000_0002;
        /// Echo NL after line kill.
        const ECHOK   = 0x0000_0004;
        /// Enable echo.
        const ECHO    = 0x0000_0008;
        /// Echo NL even if ECHO is off.
        const ECHONL  = 0x0000_0010;
        /// Echo control characters as `^X`.
        const ECHOCTL = 0x0000_0040;
        /// Enable signals.
        const ISIG    = 0x0000_0080;
        /// Canonical input.
        const ICANON  = 0x0000_0100;
        /// Extended input processing.
        const IEXTEN  = 0x0000_0400;
        /// Retype pending input.
        const PENDIN  = 0x2000_0000;
        /// Don't flush after interrupt.
        const NOFLSH  = 0x8000_0000;
    }
}

bitflags! {
    /// Modem-control bits exchanged through the modem get/set requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModemBits: u32 {
        /// Line enable.
        const LE  = 0x0001;
        /// Data terminal ready.
        const DTR = 0x0002;
        /// Request to send.
        const RTS = 0x0004;
        /// Secondary transmit.
        const ST  = 0x0008;
        /// Secondary receive.
        const SR  = 0x0010;
        /// Clear to send.
        const CTS = 0x0020;
        /// Carrier detect.
        const CAR = 0x0040;
        /// Ring.
        const RNG = 0x0080;
        /// Data set ready.
        const DSR = 0x0100;
    }
}

/// Number of control characters.
pub const NCCS: usize = 20;

/// Control-character slot value meaning "disabled".
pub const VDISABLE: u8 = 0xff;

/// End-of-file character index.
pub const VEOF: usize = 0;
/// End-of-line character index.
pub const VEOL: usize = 1;
/// Erase character index.
pub const VERASE: usize = 3;
/// Kill-line character index.
pub const VKILL: usize = 5;
/// Interrupt character index.
pub const VINTR: usize = 8;
/// Quit character index.
pub const VQUIT: usize = 9;
/// Suspend character index.
pub const VSUSP: usize = 10;
/// Start (XON) character index.
pub const VSTART: usize = 12;
/// Stop (XOFF) character index.
pub const VSTOP: usize = 13;
/// Minimum byte count for non-canonical reads.
pub const VMIN: usize = 16;
/// Timeout for non-canonical reads, in deciseconds.
pub const VTIME: usize = 17;

/// Terminal line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termios {
    /// Input modes.
    pub iflag: InputFlags,
    /// Output modes.
    pub oflag: OutputFlags,
    /// Control modes.
    pub cflag: ControlFlags,
    /// Local modes.
    pub lflag: LocalFlags,
    /// Control characters.
    pub cc: [u8; NCCS],
    /// Input speed in baud; 0 means "same as output".
    pub ispeed: u32,
    /// Output speed in baud; 0 means hang up.
    pub ospeed: u32,
}

impl Termios {
    /// Returns settings with all flags cleared, the given control modes,
    /// conventional control characters, and `speed` in both directions.
    #[must_use]
    pub fn with_cflag(cflag: ControlFlags, speed: u32) -> Self {
        let mut cc = [VDISABLE; NCCS];
        cc[VEOF] = 0x04;
        cc[VERASE] = 0x7f;
        cc[VKILL] = 0x15;
        cc[VINTR] = 0x03;
        cc[VQUIT] = 0x1c;
        cc[VSUSP] = 0x1a;
        cc[VSTART] = 0x11;
        cc[VSTOP] = 0x13;
        cc[VMIN] = 1;
        cc[VTIME] = 0;
        Self {
            iflag: InputFlags::empty(),
            oflag: OutputFlags::empty(),
            cflag,
            lflag: LocalFlags::empty(),
            cc,
            ispeed: speed,
            ospeed: speed,
        }
    }

    /// Character size in bits selected by `CSIZE`.
    #[must_use]
    pub fn char_size(&self) -> u8 {
        let size = self.cflag & ControlFlags::CSIZE;
        if size == ControlFlags::CS5 {
            5
        } else if size == ControlFlags::CS6 {
            6
        } else if size == ControlFlags::CS7 {
            7
        } else {
            8
        }
    }

    /// Returns `true` if the control character at `index` is enabled.
    #[must_use]
    pub fn cc_enabled(&self, index: usize) -> bool {
        self.cc.get(index).is_some_and(|&c| c != VDISABLE)
    }
}

impl Default for Termios {
    fn default() -> Self {
        Self::with_cflag(ControlFlags::CS8 | ControlFlags::CREAD, 9600)
    }
}
