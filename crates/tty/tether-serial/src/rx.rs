//! Receive worker.
//!
//! Moves data and events from the port's receive queue into the terminal,
//! never queueing more than the terminal's high-water mark allows. When the
//! terminal is full the worker parks on the port's `RX_EVENT` bit, which a
//! reader raises once it has drained enough input.

use std::sync::Arc;

use tether_driver_api::port::RxEvent;
use tether_driver_api::terminal::{CharError, TtyState};
use tether_driver_api::{PortError, PortState, Terminal};

use crate::manager::SerialManager;
use crate::sync::Ordering;

impl SerialManager {
    pub(crate) fn rx_loop(&self, tty: &Arc<dyn Terminal>) {
        log::debug!("tether{}: receive worker started", self.unit);
        let mut buf = vec![0u8; self.config.rx_chunk];

        while !self.is_killed() {
            let pass = if self.rx_blocked.load(Ordering::Acquire) {
                self.rx_wait_for_room()
            } else if self.port.next_event().is_some() {
                self.rx_event(tty)
            } else {
                self.rx_bulk(tty, &mut buf)
            };
            match pass {
                Ok(()) => {}
                Err(err) if err.is_offline() => {
                    log::debug!("tether{}: receive worker: {err}", self.unit);
                    break;
                }
                Err(err) => {
                    log::error!("tether{}: receive failed: {err}", self.unit);
                    break;
                }
            }
        }

        self.rx_exit(tty);
    }

    fn rx_wait_for_room(&self) -> Result<(), PortError> {
        self.port
            .watch_state(PortState::RX_EVENT, PortState::RX_EVENT, None)?;
        self.port.set_state(PortState::empty(), PortState::RX_EVENT)?;
        self.rx_blocked.store(false, Ordering::Release);
        Ok(())
    }

    fn rx_bulk(&self, tty: &Arc<dyn Terminal>, buf: &mut [u8]) -> Result<(), PortError> {
        let room = tty.input_high_water().saturating_sub(tty.input_queued());
        let room = room.min(buf.len());
        if room == 0 {
            self.rx_blocked.store(true, Ordering::Release);
            // A reader may have drained the queue before it could see the flag.
            if tty.input_queued() < tty.input_high_water() {
                self.rx_blocked.store(false, Ordering::Release);
            }
            return Ok(());
        }

        let count = self.port.dequeue_data(&mut buf[..room], 1)?;
        if count == 0 {
            return Ok(());
        }

        let data = &buf[..count];
        if tty.state().contains(TtyState::CAN_BYPASS) {
            let accepted = tty.receive_raw(data);
            if accepted < count {
                log::warn!(
                    "tether{}: dropped {} received bytes",
                    self.unit,
                    count - accepted
                );
            }
            tty.wake_readers();
        } else {
            for &byte in data {
                tty.receive_char(byte, CharError::empty());
            }
        }
        self.stamp_last_used();
        Ok(())
    }

    fn rx_event(&self, tty: &Arc<dyn Terminal>) -> Result<(), PortError> {
        match self.port.dequeue_event(false)? {
            RxEvent::SpecialByte(byte) => tty.receive_char(byte, CharError::empty()),
            RxEvent::LineBreak => tty.receive_char(0, CharError::FRAMING),
            RxEvent::FramingError(byte) => tty.receive_char(byte, CharError::FRAMING),
            RxEvent::ParityError(byte) => tty.receive_char(byte, CharError::PARITY),
            RxEvent::HardwareOverrun => {
                log::warn!("tether{}: hardware receive overrun", self.unit);
            }
            RxEvent::SoftwareOverrun => {
                log::warn!("tether{}: software receive overrun", self.unit);
            }
            RxEvent::Other(code) => {
                log::trace!("tether{}: ignoring receive event {code:#x}", self.unit);
            }
        }
        self.stamp_last_used();
        Ok(())
    }
}
