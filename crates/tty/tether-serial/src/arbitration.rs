//! Open/close arbitration.
//!
//! Exactly one open or close sequence is in flight per port, marked by the
//! `transit` flag. A thread finding it set sleeps and re-evaluates from the
//! top. Each decision step runs under the `open_close` bracket; the
//! long-running parts (acquisition, carrier waits, preemption) run with
//! `transit` held but no lock.
//!
//! Any wake-up during an open restarts the decision loop, so every exit
//! path sees the current active session, preemption state, and sticky
//! errors.

use std::sync::Arc;

use tether_driver_api::port::FlowControl;
use tether_driver_api::terminal::TtyState;
use tether_driver_api::termios::ControlFlags;
use tether_driver_api::{PortCommand, PortError, PortState, Terminal, Variant};

use crate::error::SessionError;
use crate::manager::{Caller, ManagerState, SerialManager};
use crate::session::Session;
use crate::sync::{Ordering, lock, wait};

/// Outcome of one decision step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Another sequence owns the port or is in transit; sleep and re-evaluate.
    Wait,
    /// Give up with this error.
    Fail(SessionError),
    /// Take `transit` and proceed.
    Go(Action),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// No active session: acquire the port.
    Acquire,
    /// The requested session is active and fully open: open the terminal.
    Join,
    /// The requested dial-in session is active and waiting for carrier.
    AwaitCarrier,
    /// Forcibly shut down the active session, then acquire.
    Preempt,
}

/// Result of a stage that may need the decision loop to run again.
enum Flow {
    Done,
    Restart,
}

impl SerialManager {
    /// Opens `variant`'s session on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NoDevice`] once the device is terminated.
    /// - [`SessionError::Busy`] when arbitration refuses the open, or when
    ///   this session was preempted while the caller slept.
    /// - [`SessionError::Interrupted`] when the caller's flag is raised
    ///   during a wait.
    pub fn open(&self, variant: Variant, caller: &Caller) -> Result<(), SessionError> {
        let session = self.session(variant);
        loop {
            if !self.is_alive() {
                return Err(SessionError::NoDevice);
            }
            if session.error() == Some(SessionError::Busy) {
                return Err(SessionError::Busy);
            }

            let bracket = lock(&self.open_close);
            let mut st = lock(&self.state);
            let step = if st.transit {
                Step::Wait
            } else {
                self.decide(&st, variant, caller)
            };
            let action = match step {
                Step::Wait => {
                    drop(bracket);
                    drop(self.wait_interruptible(st, caller)?);
                    continue;
                }
                Step::Fail(err) => {
                    log::debug!("tether{}: {variant} open refused: {err}", self.unit);
                    return Err(err);
                }
                Step::Go(action) => {
                    st.transit = true;
                    action
                }
            };
            drop(st);
            drop(bracket);

            let flow = match action {
                Action::Join => self.finish_open(session, caller).map(|()| Flow::Done),
                Action::AwaitCarrier => self.carrier_stage(session, caller),
                Action::Acquire => self
                    .acquire_and_init(session)
                    .and_then(|()| self.carrier_stage(session, caller)),
                Action::Preempt => match self.preempt(caller) {
                    Ok(true) => self
                        .acquire_and_init(session)
                        .and_then(|()| self.carrier_stage(session, caller)),
                    Ok(false) => Ok(Flow::Restart),
                    Err(err) => Err(err),
                },
            };
            match flow? {
                Flow::Done => return Ok(()),
                Flow::Restart => {}
            }
        }
    }

    /// Applies the arbitration rules to the current state.
    fn decide(&self, st: &ManagerState, variant: Variant, caller: &Caller) -> Step {
        let Some(active) = st.active else {
            return Step::Go(Action::Acquire);
        };
        let exclusive = self
            .session(active)
            .terminal()
            .is_some_and(|tty| tty.state().contains(TtyState::XCLUDE));
        let wait_or_busy = if caller.nonblocking {
            Step::Fail(SessionError::Busy)
        } else {
            Step::Wait
        };

        match (active, variant) {
            (Variant::CallOut, Variant::CallOut) => {
                if exclusive && !caller.privileged {
                    Step::Fail(SessionError::Busy)
                } else {
                    Step::Go(Action::Join)
                }
            }
            (Variant::CallOut, Variant::DialIn) => wait_or_busy,
            (Variant::DialIn, Variant::CallOut) if st.fully_open => {
                if exclusive && !caller.privileged {
                    Step::Fail(SessionError::Busy)
                } else if st.preempt_allowed || caller.privileged {
                    Step::Go(Action::Preempt)
                } else {
                    wait_or_busy
                }
            }
            (Variant::DialIn, Variant::CallOut) => Step::Go(Action::Preempt),
            (Variant::DialIn, Variant::DialIn) if st.fully_open => {
                if exclusive && !caller.privileged {
                    Step::Fail(SessionError::Busy)
                } else {
                    Step::Go(Action::Join)
                }
            }
            (Variant::DialIn, Variant::DialIn) => Step::Go(Action::AwaitCarrier),
        }
    }

    /// Clears `transit` and wakes every waiter.
    pub(crate) fn end_transit(&self) {
        lock(&self.state).transit = false;
        self.notify();
    }

    /// Waits (uninterruptibly) for `transit` to clear, then takes it.
    pub(crate) fn begin_transit(&self) {
        loop {
            let bracket = lock(&self.open_close);
            let mut st = lock(&self.state);
            if !st.transit {
                st.transit = true;
                return;
            }
            drop(bracket);
            drop(wait(&self.state_cv, st));
        }
    }

    // -----------------------------------------------------------------------
    // Open stages (entered with transit held)
    // -----------------------------------------------------------------------

    /// Acquires the port and brings it to the session's initial settings.
    fn acquire_and_init(&self, session: &Session) -> Result<(), SessionError> {
        let variant = session.variant();
        if let Err(err) = self.port.acquire_port(false) {
            log::debug!("tether{}: acquire failed: {err}", self.unit);
            self.end_transit();
            return Err(SessionError::Busy);
        }
        if !self.is_alive() {
            let _ = self.port.release_port();
            self.end_transit();
            return Err(SessionError::NoDevice);
        }
        {
            let mut st = lock(&self.state);
            st.active = Some(variant);
            st.acquired = true;
            st.fully_open = false;
        }
        session.clear_error();
        self.rx_blocked.store(false, Ordering::Release);

        let tty = match session.terminal_or_create(|| {
            self.host
                .create_terminal(self.device_id(variant), self.hooks_for(variant))
        }) {
            Ok(tty) => tty,
            Err(err) => {
                self.unwind_open();
                return Err(err);
            }
        };

        if let Err(err) = self.session_execute(session, PortCommand::Activate(true)) {
            self.unwind_open();
            return Err(err);
        }
        let initial = session.initial();
        tty.store_termios(&initial);
        if let Err(err) = self.apply_parameters(variant, &initial) {
            log::warn!("tether{}: initial {variant} settings rejected: {err}", self.unit);
        }
        self.optimize_input_path(variant, &initial);
        let lines = PortState::DTR | PortState::RTS;
        let _ = self.session_set_state(session, lines, lines);
        let carrier = self.port.state().contains(PortState::CAR);
        lock(&self.state).carrier_reported = carrier;
        tty.modem_changed(carrier || initial.cflag.contains(ControlFlags::CLOCAL));
        log::debug!("tether{}: {variant} acquired port (carrier {carrier})", self.unit);
        Ok(())
    }

    /// Waits for carrier if the session needs it, then completes the open.
    fn carrier_stage(&self, session: &Session, caller: &Caller) -> Result<Flow, SessionError> {
        let variant = session.variant();
        let Some(tty) = session.terminal() else {
            self.end_transit();
            return Err(SessionError::NoDevice);
        };
        let needs_carrier = variant == Variant::DialIn
            && !tty.termios().cflag.contains(ControlFlags::CLOCAL)
            && !self.port.state().contains(PortState::CAR)
            && !caller.nonblocking;
        if !needs_carrier {
            self.finish_open(session, caller)?;
            return Ok(Flow::Done);
        }

        {
            let mut st = lock(&self.state);
            st.opens_pending[variant.index()] += 1;
            st.transit = false;
        }
        self.notify();
        log::trace!("tether{}: {variant} waiting for carrier", self.unit);

        let outcome = self.sleep_for_carrier(session, caller);

        {
            let mut st = lock(&self.state);
            st.opens_pending[variant.index()] -= 1;
        }
        self.notify();

        match outcome {
            Ok(()) => Ok(Flow::Restart),
            Err(err) => {
                self.abandon_open(variant);
                Err(err)
            }
        }
    }

    fn sleep_for_carrier(&self, session: &Session, caller: &Caller) -> Result<(), SessionError> {
        let poll = self.config.interrupt_poll();
        loop {
            if caller.interrupted() {
                return Err(SessionError::Interrupted);
            }
            if !self.is_alive() {
                return Err(SessionError::NoDevice);
            }
            if let Some(err) = session.error() {
                return Err(err);
            }
            match self.port.watch_state(PortState::CAR, PortState::CAR, Some(poll)) {
                Ok(_) => return Ok(()),
                Err(PortError::Timeout) => {}
                Err(PortError::Offline | PortError::NotOpen) => {
                    if !self.is_alive() {
                        return Err(SessionError::NoDevice);
                    }
                    if let Some(err) = session.error() {
                        return Err(err);
                    }
                    // Port cycled underneath us; re-arbitrate.
                    return Ok(());
                }
                Err(err) => return Err(self.device_failure("carrier wait", err)),
            }
        }
    }

    /// Opens the terminal and, on the first full open, starts the workers.
    fn finish_open(&self, session: &Session, caller: &Caller) -> Result<(), SessionError> {
        let variant = session.variant();
        let Some(tty) = session.terminal() else {
            self.end_transit();
            return Err(SessionError::NoDevice);
        };
        let first = !lock(&self.state).fully_open;

        // Carrier may have arrived while the open slept for it.
        if first
            && !tty.state().contains(TtyState::CARR_ON)
            && self.port.state().contains(PortState::CAR)
        {
            lock(&self.state).carrier_reported = true;
            tty.modem_changed(true);
        }

        if let Err(err) = tty.open() {
            if first {
                self.unwind_open();
            } else {
                self.end_transit();
            }
            return Err(err.into());
        }

        if first {
            if let Err(err) = self.launch_workers(&tty) {
                tty.close();
                self.unwind_open();
                return Err(err);
            }
            lock(&self.state).fully_open = true;
            log::info!(
                "tether{}: {variant} open{}",
                self.unit,
                if caller.privileged { " (privileged)" } else { "" }
            );
        }
        self.end_transit();
        Ok(())
    }

    /// Starts both workers, each holding shared ownership of the manager.
    fn launch_workers(&self, tty: &Arc<dyn Terminal>) -> Result<(), SessionError> {
        let this = self.this.upgrade().ok_or(SessionError::NoDevice)?;
        {
            let mut st = lock(&self.state);
            st.rx_running = true;
            st.tx_running = true;
        }

        let rx = {
            let this = Arc::clone(&this);
            let tty = Arc::clone(tty);
            Box::new(move || this.rx_loop(&tty))
        };
        if let Err(err) = self.host.spawn(&format!("tether{}-rx", self.unit), rx) {
            let mut st = lock(&self.state);
            st.rx_running = false;
            st.tx_running = false;
            return Err(err);
        }

        let tx = {
            let tty = Arc::clone(tty);
            Box::new(move || this.tx_loop(&tty))
        };
        if let Err(err) = self.host.spawn(&format!("tether{}-tx", self.unit), tx) {
            lock(&self.state).tx_running = false;
            self.kill_workers();
            return Err(err);
        }

        if !self.is_alive() {
            self.kill_workers();
            return Err(SessionError::NoDevice);
        }
        Ok(())
    }

    /// Releases everything a failed first open acquired and clears `transit`.
    fn unwind_open(&self) {
        let _ = self
            .port
            .set_state(PortState::empty(), PortState::DTR | PortState::RTS);
        let _ = self.port.execute(PortCommand::Activate(false));
        self.release_port_once();
        {
            let mut st = lock(&self.state);
            st.active = None;
            st.fully_open = false;
            st.transit = false;
        }
        self.notify();
    }

    /// Undoes an interrupted or failed carrier wait if no one else still
    /// needs the acquired port.
    fn abandon_open(&self, variant: Variant) {
        self.begin_transit();
        let unused = {
            let st = lock(&self.state);
            st.active == Some(variant)
                && !st.fully_open
                && st.opens_pending[variant.index()] == 0
                && !st.preempt_in_progress
        };
        if unused {
            log::debug!("tether{}: abandoning {variant} open", self.unit);
            self.unwind_open();
        } else {
            self.end_transit();
        }
    }

    // -----------------------------------------------------------------------
    // Preemption
    // -----------------------------------------------------------------------

    /// Shuts down the active session so the caller can take the port.
    ///
    /// Returns `Ok(false)` when the port was used too recently; the caller
    /// has then slept out the remaining grace period and must re-arbitrate.
    fn preempt(&self, caller: &Caller) -> Result<bool, SessionError> {
        let grace = self.config.preempt_idle();
        let last_used = *lock(&self.last_used);
        let recent = last_used.and_then(|at| grace.checked_sub(at.elapsed()));
        if let Some(remaining) = recent.filter(|r| !r.is_zero()) {
            self.end_transit();
            if caller.nonblocking {
                return Err(SessionError::Busy);
            }
            log::debug!("tether{}: port busy, preempting in {remaining:?}", self.unit);
            self.sleep_interruptible(remaining, caller)?;
            return Ok(false);
        }

        let Some(victim) = lock(&self.state).active else {
            return Ok(true);
        };
        let victim_session = self.session(victim);
        victim_session.set_error(SessionError::Busy);
        {
            let mut st = lock(&self.state);
            st.preempt_allowed = false;
            st.preempt_in_progress = true;
        }
        if let Some(tty) = victim_session.terminal() {
            tty.modem_changed(false);
            tty.wake_all();
        }
        self.notify();

        self.kill_workers();
        {
            let mut st = lock(&self.state);
            while st.opens_pending[victim.index()] > 0 {
                st = wait(&self.state_cv, st);
            }
        }
        self.release_port_once();
        {
            let mut st = lock(&self.state);
            st.active = None;
            st.fully_open = false;
            st.preempt_in_progress = false;
        }
        self.notify();

        if !victim_session.is_open() {
            victim_session.clear_error();
        }
        log::info!("tether{}: {victim} session preempted", self.unit);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Closes `variant`'s session.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadDescriptor`] if the session is not open; nothing is
    /// changed in that case.
    pub fn close(&self, variant: Variant) -> Result<(), SessionError> {
        let session = self.session(variant);
        let tty = session
            .terminal()
            .filter(|tty| tty.state().contains(TtyState::ISOPEN))
            .ok_or(SessionError::BadDescriptor)?;

        self.begin_transit();
        tty.update_state(TtyState::empty(), TtyState::TTSTOP);

        if session.error().is_none() && self.active_as(variant).is_ok() {
            for command in [
                PortCommand::FlowControl(FlowControl::empty()),
                PortCommand::TransmitEnable(false),
                PortCommand::ReceiveEnable(false),
                PortCommand::LineBreak(false),
            ] {
                if let Err(err) = self.session_execute(session, command) {
                    log::debug!("tether{}: close {command:?}: {err}", self.unit);
                }
            }
        }

        tty.close();

        let (is_active, preemptible) = {
            let st = lock(&self.state);
            (st.active == Some(variant), st.preempt_allowed)
        };
        if is_active {
            let hupcl = tty.termios().cflag.contains(ControlFlags::HUPCL);
            let carrier = self.port.state().contains(PortState::CAR);
            if hupcl || (preemptible && !carrier) {
                let _ = self
                    .port
                    .set_state(PortState::empty(), PortState::DTR | PortState::RTS);
            }
            self.kill_workers();
            self.release_port_once();
            {
                let mut st = lock(&self.state);
                st.active = None;
                st.fully_open = false;
            }
            self.stamp_last_used();
            log::info!("tether{}: {variant} closed", self.unit);
        }

        self.end_transit();
        session.clear_error();
        Ok(())
    }
}
