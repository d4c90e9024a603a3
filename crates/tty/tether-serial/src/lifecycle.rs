//! Worker teardown and device lifecycle.
//!
//! Workers are stopped by raising `kill` and deactivating the port, which
//! fails every blocking port call with `Offline`. Each worker clears its
//! running flag on the way out; the port is released exactly once, either
//! by the close or preemption that stopped the workers or, when the device
//! was terminated underneath them, by the last worker to leave.

use std::sync::Arc;

use tether_driver_api::lifecycle::{ManagedDevice, Property, TerminateStatus};
use tether_driver_api::terminal::TtyState;
use tether_driver_api::termios::ControlFlags;
use tether_driver_api::{DriverError, PortCapabilities, PortCommand, Terminal, Variant};

use crate::manager::SerialManager;
use crate::sync::{Ordering, lock, wait};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Worker {
    Rx,
    Tx,
}

impl SerialManager {
    /// Stops both workers and waits for them to exit. Not interruptible.
    pub(crate) fn kill_workers(&self) {
        self.kill.store(true, Ordering::Release);
        if let Err(err) = self.port.execute(PortCommand::Activate(false)) {
            log::debug!("tether{}: deactivate: {err}", self.unit);
        }
        {
            let mut st = lock(&self.state);
            while st.rx_running || st.tx_running {
                st = wait(&self.state_cv, st);
            }
        }
        self.kill.store(false, Ordering::Release);
        self.rx_blocked.store(false, Ordering::Release);
        self.cancel_debounce();
    }

    /// Releases the port if it is still acquired.
    pub(crate) fn release_port_once(&self) {
        let acquired = std::mem::take(&mut lock(&self.state).acquired);
        if !acquired {
            return;
        }
        if let Err(err) = self.port.release_port() {
            if err.is_offline() {
                log::debug!("tether{}: release: {err}", self.unit);
            } else {
                log::error!("tether{}: release failed: {err}", self.unit);
            }
        }
    }

    pub(crate) fn rx_exit(&self, tty: &Arc<dyn Terminal>) {
        self.worker_exit(Worker::Rx, tty);
    }

    pub(crate) fn tx_exit(&self, tty: &Arc<dyn Terminal>) {
        self.cancel_debounce();
        self.worker_exit(Worker::Tx, tty);
    }

    /// Marks `worker` stopped. The last worker out finalizes a deferred
    /// termination, or hangs up a terminal whose port went away unasked.
    fn worker_exit(&self, worker: Worker, tty: &Arc<dyn Terminal>) {
        let killed = self.is_killed();
        let (last, finalize) = {
            let mut st = lock(&self.state);
            match worker {
                Worker::Rx => st.rx_running = false,
                Worker::Tx => st.tx_running = false,
            }
            let last = !st.rx_running && !st.tx_running;
            let finalize = last && st.deferred_terminate;
            if finalize {
                st.deferred_terminate = false;
            }
            (last, finalize)
        };
        self.notify();
        log::debug!("tether{}: {worker:?} worker exited", self.unit);

        if finalize {
            self.release_port_once();
            self.finish_termination();
        } else if last && !killed && self.is_alive() {
            self.hang_up_stale(tty);
        }
    }

    /// Some transports vanish without dropping carrier; make sure the
    /// terminal still sees a hang-up.
    fn hang_up_stale(&self, tty: &Arc<dyn Terminal>) {
        if !self
            .port
            .capabilities()
            .contains(PortCapabilities::STALE_NODE_ON_REMOVAL)
        {
            return;
        }
        let mut termios = tty.termios();
        termios.cflag.remove(ControlFlags::CLOCAL);
        tty.store_termios(&termios);
        tty.modem_changed(false);
        log::info!("tether{}: port vanished, hanging up", self.unit);
    }

    fn finish_termination(&self) {
        {
            let mut st = lock(&self.state);
            st.active = None;
            st.fully_open = false;
        }
        self.notify();
        self.host.termination_complete(self.device_id(Variant::DialIn));
        log::info!("tether{}: terminated", self.unit);
    }

    /// Blocks until no session is active and no open or close is in transit.
    pub fn wait_for_idle(&self) {
        let mut st = lock(&self.state);
        while st.active.is_some() || st.transit {
            st = wait(&self.state_cv, st);
        }
    }
}

impl ManagedDevice for SerialManager {
    fn start(&self) -> Result<(), DriverError> {
        let this = self.this.upgrade().ok_or(DriverError::InvalidState)?;
        if !self.registry.register(self.unit, Some(&this)) {
            log::error!("tether{}: unit already bound", self.unit);
            return Err(DriverError::InitFailed);
        }
        for variant in Variant::ALL {
            let id = self.device_id(variant);
            let name = self.node_name(variant);
            if let Err(err) = self.host.publish_node(id, &name) {
                log::error!("tether{}: publishing {name} failed: {err}", self.unit);
                for published in Variant::ALL.into_iter().take_while(|v| *v != variant) {
                    self.host.remove_node(self.device_id(published));
                }
                self.registry.register(self.unit, None);
                return Err(DriverError::InitFailed);
            }
        }
        log::info!(
            "tether{}: started as {} / {}",
            self.unit,
            self.node_name(Variant::DialIn),
            self.node_name(Variant::CallOut)
        );
        Ok(())
    }

    fn terminate(&self) -> TerminateStatus {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return TerminateStatus::Complete;
        }
        log::info!("tether{}: terminating", self.unit);
        self.registry.register(self.unit, None);
        for variant in Variant::ALL {
            self.host.remove_node(self.device_id(variant));
        }

        let workers = {
            let mut st = lock(&self.state);
            let workers = st.rx_running || st.tx_running;
            st.deferred_terminate = workers;
            workers
        };

        for session in &self.sessions {
            if let Some(tty) = session.terminal() {
                if tty.state().contains(TtyState::ISOPEN) {
                    tty.modem_changed(false);
                }
                tty.wake_all();
            }
        }
        // Fails every blocked port call, including carrier waits.
        if let Err(err) = self.port.execute(PortCommand::Activate(false)) {
            log::debug!("tether{}: deactivate: {err}", self.unit);
        }
        self.notify();

        if workers {
            return TerminateStatus::Deferred;
        }
        // No workers: nothing else will release the port.
        self.begin_transit();
        self.release_port_once();
        {
            let mut st = lock(&self.state);
            st.active = None;
            st.fully_open = false;
        }
        self.end_transit();
        log::info!("tether{}: terminated", self.unit);
        TerminateStatus::Complete
    }

    fn stop(&self) {
        self.registry.register(self.unit, None);
        log::debug!("tether{}: stopped", self.unit);
    }

    fn set_properties(&self, properties: &[Property]) -> Result<(), DriverError> {
        for property in properties {
            match property {
                Property::WaitForIdle => self.wait_for_idle(),
            }
        }
        Ok(())
    }
}

impl Drop for SerialManager {
    fn drop(&mut self) {
        self.registry.register(self.unit, None);
        self.registry.release(self.unit);
        log::debug!("tether{}: released unit", self.unit);
    }
}
