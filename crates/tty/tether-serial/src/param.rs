//! Translation between terminal settings and port-device parameters.

use tether_driver_api::port::{FlowControl, LatencyMode, Parity, StopBits};
use tether_driver_api::terminal::{LineDiscipline, TtyState};
use tether_driver_api::termios::{
    ControlFlags, InputFlags, LocalFlags, ModemBits, VSTART, VSTOP,
};
use tether_driver_api::{PortCapabilities, PortCommand, PortState, Termios, Variant};

use crate::baud;
use crate::error::SessionError;
use crate::manager::SerialManager;
use crate::sync::lock;

/// SLIP frame delimiter.
const SLIP_END: u8 = 0xc0;
/// PPP frame flag.
const PPP_FLAG: u8 = 0x7e;

/// Signal lines the host drives.
pub(crate) const MODEM_OUTPUTS: PortState = PortState::DTR.union(PortState::RTS);

/// Input flags owned by software flow control.
const SOFTWARE_IFLAGS: InputFlags = InputFlags::IXON
    .union(InputFlags::IXOFF)
    .union(InputFlags::IXANY);

/// Control flags owned by hardware flow control.
const HARDWARE_CFLAGS: ControlFlags = ControlFlags::CCTS_OFLOW
    .union(ControlFlags::CRTS_IFLOW)
    .union(ControlFlags::CDTR_IFLOW)
    .union(ControlFlags::CDSR_OFLOW);

/// `(port bit, modem bit)` pairs.
const MODEM_MAP: [(PortState, ModemBits); 6] = [
    (PortState::DTR, ModemBits::DTR),
    (PortState::RTS, ModemBits::RTS),
    (PortState::CTS, ModemBits::CTS),
    (PortState::CAR, ModemBits::CAR),
    (PortState::RI, ModemBits::RNG),
    (PortState::DSR, ModemBits::DSR),
];

/// Flow-control flags reconstructed from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlowFlags {
    pub(crate) iflag: InputFlags,
    pub(crate) cflag: ControlFlags,
}

/// Checks settings for combinations no device can honour.
///
/// # Errors
///
/// [`SessionError::InvalidArgument`] when software flow control is requested
/// with a disabled start or stop character, or when the input speed differs
/// from a non-zero output speed.
pub(crate) fn validate(termios: &Termios) -> Result<(), SessionError> {
    if termios.iflag.intersects(SOFTWARE_IFLAGS)
        && !(termios.cc_enabled(VSTART) && termios.cc_enabled(VSTOP))
    {
        return Err(SessionError::InvalidArgument);
    }
    if termios.ispeed != 0 && termios.ispeed != termios.ospeed {
        return Err(SessionError::InvalidArgument);
    }
    Ok(())
}

/// Flow-control set requested by `termios`.
pub(crate) fn flow_control_for(termios: &Termios) -> FlowControl {
    let mut flow = FlowControl::empty();
    flow.set(FlowControl::TX_XON_XOFF, termios.iflag.contains(InputFlags::IXON));
    flow.set(FlowControl::XANY, termios.iflag.contains(InputFlags::IXANY));
    flow.set(FlowControl::RX_XON_XOFF, termios.iflag.contains(InputFlags::IXOFF));
    flow.set(FlowControl::RTS_INPUT, termios.cflag.contains(ControlFlags::CRTS_IFLOW));
    flow.set(FlowControl::CTS_OUTPUT, termios.cflag.contains(ControlFlags::CCTS_OFLOW));
    flow.set(FlowControl::DTR_INPUT, termios.cflag.contains(ControlFlags::CDTR_IFLOW));
    flow.set(FlowControl::DSR_OUTPUT, termios.cflag.contains(ControlFlags::CDSR_OFLOW));
    flow
}

/// Inverse of [`flow_control_for`].
pub(crate) fn flow_flags_for(flow: FlowControl) -> FlowFlags {
    let mut iflag = InputFlags::empty();
    iflag.set(InputFlags::IXON, flow.contains(FlowControl::TX_XON_XOFF));
    iflag.set(InputFlags::IXANY, flow.contains(FlowControl::XANY));
    iflag.set(InputFlags::IXOFF, flow.contains(FlowControl::RX_XON_XOFF));
    let mut cflag = ControlFlags::empty();
    cflag.set(ControlFlags::CRTS_IFLOW, flow.contains(FlowControl::RTS_INPUT));
    cflag.set(ControlFlags::CCTS_OFLOW, flow.contains(FlowControl::CTS_OUTPUT));
    cflag.set(ControlFlags::CDTR_IFLOW, flow.contains(FlowControl::DTR_INPUT));
    cflag.set(ControlFlags::CDSR_OFLOW, flow.contains(FlowControl::DSR_OUTPUT));
    FlowFlags { iflag, cflag }
}

/// Replaces the flow-control bits of `termios` with `flow`.
pub(crate) fn merge_flow_flags(termios: &mut Termios, flow: FlowFlags) {
    termios.iflag = (termios.iflag - SOFTWARE_IFLAGS) | flow.iflag;
    termios.cflag = (termios.cflag - HARDWARE_CFLAGS) | flow.cflag;
}

/// Device signal bits as terminal modem bits.
pub(crate) fn modem_bits(state: PortState) -> ModemBits {
    let mut bits = ModemBits::LE;
    for (port, modem) in MODEM_MAP {
        bits.set(modem, state.contains(port));
    }
    bits
}

/// Terminal modem bits as device signal bits.
pub(crate) fn modem_state(bits: ModemBits) -> PortState {
    let mut state = PortState::empty();
    for (port, modem) in MODEM_MAP {
        state.set(port, bits.contains(modem));
    }
    state
}

/// Returns `true` if received bytes need no per-character processing.
fn can_bypass(termios: &Termios) -> bool {
    let iflag = termios.iflag;
    let lflag = termios.lflag;
    let transforms = InputFlags::ICRNL
        | InputFlags::IGNCR
        | InputFlags::IMAXBEL
        | InputFlags::INLCR
        | InputFlags::ISTRIP
        | InputFlags::IXON;
    let editing = LocalFlags::ECHO
        | LocalFlags::ICANON
        | LocalFlags::IEXTEN
        | LocalFlags::ISIG
        | LocalFlags::PENDIN;
    !iflag.intersects(transforms)
        && (!iflag.contains(InputFlags::BRKINT) || iflag.contains(InputFlags::IGNBRK))
        && (!iflag.contains(InputFlags::PARMRK)
            || iflag.contains(InputFlags::IGNPAR | InputFlags::IGNBRK))
        && !lflag.intersects(editing)
}

fn latency_for(discipline: LineDiscipline) -> LatencyMode {
    match discipline {
        LineDiscipline::Slip => LatencyMode::SpecialByte(SLIP_END),
        LineDiscipline::Ppp => LatencyMode::SpecialByte(PPP_FLAG),
        LineDiscipline::Termios | LineDiscipline::Other(_) => LatencyMode::AnyByte,
    }
}

impl SerialManager {
    /// Pushes `termios` down to the device.
    ///
    /// An output speed of zero hangs up (drops DTR) without touching any
    /// other parameter.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidArgument`] for rejected settings,
    /// [`SessionError::Offline`] if `variant` does not hold the port.
    pub(crate) fn apply_parameters(
        &self,
        variant: Variant,
        termios: &Termios,
    ) -> Result<(), SessionError> {
        validate(termios)?;
        let _settings = lock(&self.settings);
        let session = self.active_as(variant)?;

        if termios.ospeed == 0 {
            log::debug!("tether{}: B0, dropping DTR", self.unit);
            return self.session_set_state(session, PortState::empty(), PortState::DTR);
        }

        let rate = baud::encode_speed(termios.ospeed)?;
        if matches!(rate, PortCommand::ExternalClock(_))
            && !self
                .port
                .capabilities()
                .contains(PortCapabilities::EXTERNAL_CLOCK)
        {
            log::debug!(
                "tether{}: {} baud needs an external clock",
                self.unit,
                termios.ospeed
            );
            return Err(SessionError::InvalidArgument);
        }
        if let PortCommand::DataRate(half) = rate {
            log::trace!(
                "tether{}: {} baud requested, {} baud set",
                self.unit,
                termios.ospeed,
                baud::decode_rate(half)
            );
        }
        self.session_execute(session, rate)?;
        self.session_execute(session, PortCommand::DataSize(termios.char_size()))?;

        let parity = if !termios.cflag.contains(ControlFlags::PARENB) {
            Parity::None
        } else if termios.cflag.contains(ControlFlags::PARODD) {
            Parity::Odd
        } else {
            Parity::Even
        };
        self.session_execute(session, PortCommand::Parity(parity))?;

        let stop_bits = if termios.cflag.contains(ControlFlags::CSTOPB) {
            StopBits::Two
        } else {
            StopBits::One
        };
        self.session_execute(session, PortCommand::StopBits(stop_bits))?;

        let flow = flow_control_for(termios);
        if flow.intersects(FlowControl::SOFTWARE) {
            self.session_execute(session, PortCommand::XonChar(termios.cc[VSTART]))?;
            self.session_execute(session, PortCommand::XoffChar(termios.cc[VSTOP]))?;
        }
        self.session_execute(session, PortCommand::FlowControl(flow))?;

        self.session_execute(session, PortCommand::TransmitEnable(true))?;
        self.session_execute(
            session,
            PortCommand::ReceiveEnable(termios.cflag.contains(ControlFlags::CREAD)),
        )
    }

    /// Reads the device's flow-control set back as termios flags.
    ///
    /// # Errors
    ///
    /// [`SessionError::Offline`] if `variant` does not hold the port.
    pub(crate) fn read_flow_control(&self, variant: Variant) -> Result<FlowFlags, SessionError> {
        let _settings = lock(&self.settings);
        self.active_as(variant)?;
        let params = self
            .port
            .line_params()
            .map_err(|err| self.device_failure("line_params", err))?;
        Ok(flow_flags_for(params.flow_control))
    }

    /// Enables the raw input path when the settings allow it and negotiates
    /// the receive latency mode for the attached line discipline.
    pub(crate) fn optimize_input_path(&self, variant: Variant, termios: &Termios) {
        let session = self.session(variant);
        let Some(tty) = session.terminal() else {
            return;
        };
        if can_bypass(termios) {
            tty.update_state(TtyState::CAN_BYPASS, TtyState::empty());
        } else {
            tty.update_state(TtyState::empty(), TtyState::CAN_BYPASS);
        }
        let latency = latency_for(tty.line_discipline());
        if let Ok(session) = self.active_as(variant) {
            if let Err(err) = self.session_execute(session, PortCommand::Latency(latency)) {
                log::debug!("tether{}: latency mode not applied: {err}", self.unit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_driver_api::termios::VDISABLE;

    #[test]
    fn software_and_hardware_flow_round_trip_independently() {
        let cases = [
            (InputFlags::IXON, ControlFlags::empty()),
            (InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY, ControlFlags::empty()),
            (InputFlags::empty(), ControlFlags::CRTSCTS),
            (InputFlags::IXOFF, ControlFlags::CDTR_IFLOW | ControlFlags::CDSR_OFLOW),
        ];
        for (iflag, cflag) in cases {
            let mut termios = Termios::default();
            termios.iflag |= iflag;
            termios.cflag |= cflag;
            let flags = flow_flags_for(flow_control_for(&termios));
            assert_eq!(flags.iflag, iflag);
            assert_eq!(flags.cflag, cflag);
        }
    }

    #[test]
    fn merge_replaces_only_flow_bits() {
        let mut termios = Termios::default();
        termios.iflag = InputFlags::IXON | InputFlags::ICRNL;
        termios.cflag |= ControlFlags::CCTS_OFLOW;
        merge_flow_flags(
            &mut termios,
            FlowFlags {
                iflag: InputFlags::IXOFF,
                cflag: ControlFlags::CRTS_IFLOW,
            },
        );
        assert_eq!(termios.iflag, InputFlags::IXOFF | InputFlags::ICRNL);
        assert!(termios.cflag.contains(ControlFlags::CRTS_IFLOW | ControlFlags::CS8));
        assert!(!termios.cflag.contains(ControlFlags::CCTS_OFLOW));
    }

    #[test]
    fn software_flow_needs_both_characters() {
        let mut termios = Termios::default();
        termios.iflag = InputFlags::IXON;
        assert_eq!(validate(&termios), Ok(()));
        termios.cc[VSTART] = VDISABLE;
        assert_eq!(validate(&termios), Err(SessionError::InvalidArgument));
    }

    #[test]
    fn input_speed_must_match() {
        let mut termios = Termios::default();
        termios.ispeed = 0;
        assert_eq!(validate(&termios), Ok(()));
        termios.ispeed = 4800;
        assert_eq!(validate(&termios), Err(SessionError::InvalidArgument));
    }

    #[test]
    fn modem_bits_round_trip() {
        let state = PortState::DTR | PortState::CAR | PortState::RI | PortState::ACTIVE;
        let bits = modem_bits(state);
        assert_eq!(
            bits,
            ModemBits::LE | ModemBits::DTR | ModemBits::CAR | ModemBits::RNG
        );
        assert_eq!(
            modem_state(bits),
            PortState::DTR | PortState::CAR | PortState::RI
        );
    }

    #[test]
    fn raw_settings_bypass() {
        let raw = Termios::default();
        assert!(can_bypass(&raw));
        let mut cooked = raw;
        cooked.lflag = LocalFlags::ICANON | LocalFlags::ECHO;
        assert!(!can_bypass(&cooked));
        let mut brk = raw;
        brk.iflag = InputFlags::BRKINT;
        assert!(!can_bypass(&brk));
        brk.iflag |= InputFlags::IGNBRK;
        assert!(can_bypass(&brk));
    }

    #[test]
    fn packet_disciplines_use_frame_bytes() {
        assert_eq!(latency_for(LineDiscipline::Slip), LatencyMode::SpecialByte(0xc0));
        assert_eq!(latency_for(LineDiscipline::Ppp), LatencyMode::SpecialByte(0x7e));
        assert_eq!(latency_for(LineDiscipline::Termios), LatencyMode::AnyByte);
    }
}
