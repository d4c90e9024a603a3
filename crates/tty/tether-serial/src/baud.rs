//! Speed encoding.
//!
//! Port devices take rates in half-bits per second so 134.5 baud is exact.
//! A requested speed resolves, in order, to an exact standard rate, to a
//! standard rate it lies within 2% of, or (when odd) to an external-clock
//! multiplier of `speed >> 1`.

use tether_driver_api::PortCommand;

use crate::error::SessionError;

/// `(baud, half-bits per second)` for every standard rate.
const STANDARD_RATES: &[(u32, u32)] = &[
    (0, 0),
    (50, 100),
    (75, 150),
    (110, 220),
    (134, 269),
    (150, 300),
    (200, 400),
    (300, 600),
    (600, 1200),
    (1200, 2400),
    (1800, 3600),
    (2400, 4800),
    (4800, 9600),
    (7200, 14400),
    (9600, 19200),
    (14400, 28800),
    (19200, 38400),
    (28800, 57600),
    (38400, 76800),
    (57600, 115_200),
    (76800, 153_600),
    (115_200, 230_400),
    (230_400, 460_800),
];

/// Divisor giving the snapping window around a standard rate.
const LAX_DIVISOR: u32 = 50;

/// Maps a speed in baud to the port command that selects it.
///
/// # Errors
///
/// [`SessionError::InvalidArgument`] for an even speed that is neither
/// standard nor close to one.
pub(crate) fn encode_speed(speed: u32) -> Result<PortCommand, SessionError> {
    if let Some(&(_, half)) = STANDARD_RATES.iter().find(|(baud, _)| *baud == speed) {
        return Ok(PortCommand::DataRate(half));
    }

    let nearest = STANDARD_RATES
        .iter()
        .filter(|(baud, _)| *baud != 0 && speed.abs_diff(*baud) <= *baud / LAX_DIVISOR)
        .min_by_key(|(baud, _)| speed.abs_diff(*baud));
    if let Some(&(_, half)) = nearest {
        return Ok(PortCommand::DataRate(half));
    }

    if speed & 1 == 1 {
        return Ok(PortCommand::ExternalClock(speed >> 1));
    }
    Err(SessionError::InvalidArgument)
}

/// Maps a half-bit rate back to baud, for reporting.
pub(crate) fn decode_rate(half: u32) -> u32 {
    STANDARD_RATES
        .iter()
        .find(|(_, h)| *h == half)
        .map_or(half >> 1, |&(baud, _)| baud)
}
