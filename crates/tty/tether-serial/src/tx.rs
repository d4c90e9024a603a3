//! Transmit worker and carrier debounce.
//!
//! The worker sleeps until one of its watched state bits changes:
//!
//! | bit             | action                                          |
//! |-----------------|-------------------------------------------------|
//! | `TX_EVENT`      | output was queued; drain                        |
//! | `TXQ_LOW_WATER` | the device has room again; drain               |
//! | `TXQ_EMPTY`     | start watching `TX_BUSY` for the chip going idle |
//! | `TX_BUSY`       | chip idle; tell the line discipline             |
//! | `CAR`           | carrier moved; debounce                         |

use std::sync::Arc;

use tether_driver_api::terminal::TtyState;
use tether_driver_api::{PortError, PortState, Terminal};

use crate::manager::SerialManager;
use crate::sync::lock;

const TX_WATCH: PortState = PortState::TX_EVENT
    .union(PortState::TXQ_LOW_WATER)
    .union(PortState::TXQ_EMPTY)
    .union(PortState::CAR);

/// Output taken from the terminal that the device has not accepted yet.
struct TxBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl TxBuffer {
    fn new(chunk: usize) -> Self {
        Self {
            data: vec![0; chunk],
            start: 0,
            end: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn pending(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Fills the empty buffer with at most `limit` bytes from `take`.
    fn refill(&mut self, take: impl FnOnce(&mut [u8]) -> usize, limit: usize) -> usize {
        let limit = limit.min(self.data.len());
        let count = take(&mut self.data[..limit]).min(limit);
        self.start = 0;
        self.end = count;
        count
    }

    fn consume(&mut self, accepted: usize) {
        self.start = (self.start + accepted).min(self.end);
    }
}

impl SerialManager {
    pub(crate) fn tx_loop(&self, tty: &Arc<dyn Terminal>) {
        log::debug!("tether{}: transmit worker started", self.unit);
        let mut out = TxBuffer::new(self.config.tx_chunk);
        // Carrier is measured against what the terminal was last told.
        let mut last = self.port.state();
        last.set(PortState::CAR, lock(&self.state).carrier_reported);
        let mut watch_busy = false;

        while !self.is_killed() {
            let mask = if watch_busy {
                TX_WATCH | PortState::TX_BUSY
            } else {
                TX_WATCH
            };
            // Wake on TX_EVENT being set or on any other watched bit changing.
            let wanted = (last.complement() & mask) | PortState::TX_EVENT;
            let state = match self.port.watch_state(wanted, mask, None) {
                Ok(state) => state,
                Err(err) => {
                    self.log_tx_stop(err);
                    break;
                }
            };
            let delta = state ^ last;
            let rising = state & delta;

            if delta.contains(PortState::CAR) {
                self.carrier_changed();
            }

            if state.contains(PortState::TX_EVENT) {
                if let Err(err) = self.port.set_state(PortState::empty(), PortState::TX_EVENT) {
                    self.log_tx_stop(err);
                    break;
                }
                self.drain_output(tty, &mut out);
            } else if rising.contains(PortState::TXQ_LOW_WATER) {
                self.drain_output(tty, &mut out);
            }

            if rising.contains(PortState::TXQ_EMPTY) {
                if state.contains(PortState::TX_BUSY) {
                    watch_busy = true;
                } else {
                    self.chip_idle(tty);
                }
            } else if watch_busy
                && delta.contains(PortState::TX_BUSY)
                && !state.contains(PortState::TX_BUSY)
            {
                watch_busy = false;
                self.chip_idle(tty);
            }

            last = state - PortState::TX_EVENT;
        }

        self.tx_exit(tty);
    }

    fn log_tx_stop(&self, err: PortError) {
        if err.is_offline() {
            log::debug!("tether{}: transmit worker: {err}", self.unit);
        } else {
            log::error!("tether{}: transmit failed: {err}", self.unit);
        }
    }

    /// Moves queued terminal output into the device until either runs dry.
    ///
    /// Bytes the device refuses stay in `out` and go first on the next pass.
    fn drain_output(&self, tty: &Arc<dyn Terminal>, out: &mut TxBuffer) {
        let mut marked_busy = false;
        while (!out.is_empty() || tty.output_queued() > 0) && !self.is_killed() {
            if !marked_busy {
                tty.update_state(TtyState::BUSY, TtyState::empty());
                marked_busy = true;
            }
            if out.is_empty() {
                let capacity = match self.port.tx_capacity() {
                    Ok(capacity) => capacity,
                    Err(err) => {
                        self.log_tx_stop(err);
                        break;
                    }
                };
                if capacity == 0 {
                    // Resumes on the next low-water transition.
                    break;
                }
                if out.refill(|chunk| tty.take_output(chunk), capacity) == 0 {
                    break;
                }
            }
            match self.port.enqueue_data(out.pending(), false) {
                Ok(0) => {
                    log::trace!(
                        "tether{}: device full, holding {} bytes",
                        self.unit,
                        out.pending().len()
                    );
                    break;
                }
                Ok(accepted) => {
                    out.consume(accepted);
                    self.stamp_last_used();
                }
                Err(err) => {
                    self.log_tx_stop(err);
                    break;
                }
            }
        }
        tty.wake_writers();
    }

    fn chip_idle(&self, tty: &Arc<dyn Terminal>) {
        tty.update_state(TtyState::empty(), TtyState::BUSY);
        tty.transmit_complete();
    }

    // -----------------------------------------------------------------------
    // Carrier debounce
    // -----------------------------------------------------------------------

    /// Handles a carrier transition: cancels a pending debounce, or arms one.
    pub(crate) fn carrier_changed(&self) {
        let generation = {
            let mut st = lock(&self.state);
            st.timer_generation += 1;
            if st.timer_due {
                st.timer_due = false;
                log::trace!("tether{}: carrier glitch ignored", self.unit);
                return;
            }
            st.timer_due = true;
            st.timer_generation
        };
        let Some(this) = self.this.upgrade() else {
            lock(&self.state).timer_due = false;
            return;
        };
        self.host.schedule_after(
            self.config.dcd_delay(),
            Box::new(move || this.debounce_fired(generation)),
        );
    }

    fn debounce_fired(&self, generation: u64) {
        let active = {
            let mut st = lock(&self.state);
            if !st.timer_due || st.timer_generation != generation {
                return;
            }
            st.timer_due = false;
            st.active
        };
        let Some(variant) = active else {
            return;
        };
        let Some(tty) = self.session(variant).terminal() else {
            return;
        };
        let carrier = self.port.state().contains(PortState::CAR);
        lock(&self.state).carrier_reported = carrier;
        log::debug!("tether{}: carrier {}", self.unit, if carrier { "up" } else { "down" });
        if !tty.modem_changed(carrier) {
            let _ = self.port.set_state(PortState::empty(), PortState::DTR);
        }
    }

    /// Cancels an outstanding debounce callback.
    pub(crate) fn cancel_debounce(&self) {
        let mut st = lock(&self.state);
        if st.timer_due {
            st.timer_due = false;
            st.timer_generation += 1;
        }
    }
}
