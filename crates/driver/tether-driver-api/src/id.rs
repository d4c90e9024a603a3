//! Device identifiers.
//!
//! A [`DeviceId`] is a `(major, minor)` pair. The minor number packs the
//! port's unit index together with the session [`Variant`]: bit 0 selects
//! the call-out variant and the remaining bits hold the unit.

use core::fmt;

/// Minor-number bit that selects the call-out session.
pub const CALLOUT_BIT: u32 = 1;

/// One of the two logical sessions sharing a physical port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Incoming-call session; normally waits for carrier before opening.
    DialIn,
    /// Outgoing-call session; always considered fully open once acquired.
    CallOut,
}

impl Variant {
    /// Both variants, in slot order.
    pub const ALL: [Self; 2] = [Self::DialIn, Self::CallOut];

    /// Returns the slot index used for per-variant tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::DialIn => 0,
            Self::CallOut => 1,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DialIn => f.write_str("dial-in"),
            Self::CallOut => f.write_str("call-out"),
        }
    }
}

/// Character-device identifier naming a port and a session variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    major: u32,
    minor: u32,
}

impl DeviceId {
    /// Creates an identifier from raw numbers.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Creates the identifier for `unit` and `variant`.
    #[must_use]
    pub const fn for_unit(major: u32, unit: u32, variant: Variant) -> Self {
        let bit = match variant {
            Variant::DialIn => 0,
            Variant::CallOut => CALLOUT_BIT,
        };
        Self {
            major,
            minor: (unit << 1) | bit,
        }
    }

    /// Returns the major number.
    #[must_use]
    pub const fn major(self) -> u32 {
        self.major
    }

    /// Returns the raw minor number.
    #[must_use]
    pub const fn minor(self) -> u32 {
        self.minor
    }

    /// Returns the port unit index encoded in the minor number.
    #[must_use]
    pub const fn unit(self) -> u32 {
        self.minor >> 1
    }

    /// Returns the session variant encoded in the minor number.
    #[must_use]
    pub const fn variant(self) -> Variant {
        if self.minor & CALLOUT_BIT != 0 {
            Variant::CallOut
        } else {
            Variant::DialIn
        }
    }

    /// Returns the identifier of the same unit with a different variant.
    #[must_use]
    pub const fn with_variant(self, variant: Variant) -> Self {
        Self::for_unit(self.major, self.unit(), variant)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}
