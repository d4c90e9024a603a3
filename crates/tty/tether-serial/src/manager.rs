//! The per-port session manager.
//!
//! A [`SerialManager`] owns one [`PortDevice`] and the two sessions
//! (dial-in, call-out) that share it. Open and close arbitration lives in
//! `arbitration.rs`, the worker loops in `rx.rs` and `tx.rs`, parameter
//! translation in `param.rs`, and teardown in `lifecycle.rs`; this module
//! holds the shared state and the caller-facing data path.
//!
//! # Locking
//!
//! Acquisition order is `open_close` → `settings` → `state` → session
//! locks. `state` is only ever held for short, non-blocking sections and
//! across condition-variable waits; device calls are made without it.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tether_driver_api::terminal::{PollFlags, TtyRequest};
use tether_driver_api::{
    DeviceId, PortCommand, PortDevice, PortError, PortState, Termios, Variant,
};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::host::HostBinding;
use crate::param;
use crate::registry::DeviceRegistry;
use crate::session::{Session, SessionHooks};
use crate::sync::{AtomicBool, Condvar, Mutex, MutexGuard, Ordering, lock, wait_timeout};

// ---------------------------------------------------------------------------
// Callers
// ---------------------------------------------------------------------------

/// Cancellation flag for a blocking call.
///
/// Blocking waits poll the flag at the configured interval and return
/// [`SessionError::Interrupted`] once it is raised.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Lowers the flag.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Returns `true` if the flag is raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Properties of the thread making an open or ioctl request.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    /// The caller may override exclusivity and force preemption.
    pub privileged: bool,
    /// The caller must not sleep.
    pub nonblocking: bool,
    /// Cancellation flag for blocking waits.
    pub interrupt: Option<Interrupt>,
}

impl Caller {
    pub(crate) fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(Interrupt::is_raised)
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State guarded by [`SerialManager::state`].
#[derive(Debug, Default)]
pub(crate) struct ManagerState {
    /// An open or close sequence is in progress.
    pub(crate) transit: bool,
    /// The session holding the port.
    pub(crate) active: Option<Variant>,
    /// The active session has completed its first full open.
    pub(crate) fully_open: bool,
    /// The port device is acquired and not yet released.
    pub(crate) acquired: bool,
    /// The active dial-in session may be preempted.
    pub(crate) preempt_allowed: bool,
    /// A forced shutdown of the active session is running.
    pub(crate) preempt_in_progress: bool,
    /// Opens sleeping on carrier, per variant.
    pub(crate) opens_pending: [usize; 2],
    pub(crate) rx_running: bool,
    pub(crate) tx_running: bool,
    /// Termination was requested while workers were running.
    pub(crate) deferred_terminate: bool,
    /// A carrier debounce callback is outstanding.
    pub(crate) timer_due: bool,
    /// Incremented whenever the outstanding debounce is cancelled.
    pub(crate) timer_generation: u64,
    /// Carrier level last reported to the active terminal.
    pub(crate) carrier_reported: bool,
}

/// Serial-port session manager for one physical port.
pub struct SerialManager {
    pub(crate) this: Weak<SerialManager>,
    pub(crate) port: Arc<dyn PortDevice>,
    pub(crate) host: Arc<dyn HostBinding>,
    pub(crate) registry: Arc<DeviceRegistry<SerialManager>>,
    pub(crate) config: SessionConfig,
    pub(crate) unit: u32,
    pub(crate) sessions: [Session; 2],

    pub(crate) state: Mutex<ManagerState>,
    pub(crate) state_cv: Condvar,
    /// Serializes each open/close decision step.
    pub(crate) open_close: Mutex<()>,
    /// Serializes parameter changes against device reads.
    pub(crate) settings: Mutex<()>,

    /// The device has not been terminated.
    pub(crate) alive: AtomicBool,
    /// Workers must exit.
    pub(crate) kill: AtomicBool,
    /// The receive worker found no input room on its last pass.
    pub(crate) rx_blocked: AtomicBool,
    pub(crate) last_used: Mutex<Option<Instant>>,
}

impl SerialManager {
    /// Creates a manager for `port`, reserving a unit in `registry`.
    ///
    /// The manager is not reachable through the registry until
    /// [`ManagedDevice::start`](tether_driver_api::lifecycle::ManagedDevice::start)
    /// runs.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidArgument`] for an invalid configuration,
    /// [`SessionError::NoDevice`] if no unit could be reserved.
    pub fn new(
        port: Arc<dyn PortDevice>,
        host: Arc<dyn HostBinding>,
        registry: Arc<DeviceRegistry<SerialManager>>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, SessionError> {
        config.validate().map_err(|err| {
            log::error!("tether: {err}");
            SessionError::InvalidArgument
        })?;
        let unit = registry.assign_id().ok_or(SessionError::NoDevice)?;
        let speed = config.default_speed;
        let preempt_allowed = config.preempt_allowed;
        log::debug!("tether{unit}: created");
        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            port,
            host,
            registry,
            config,
            unit,
            sessions: [
                Session::new(Variant::DialIn, speed),
                Session::new(Variant::CallOut, speed),
            ],
            state: Mutex::new(ManagerState {
                preempt_allowed,
                ..ManagerState::default()
            }),
            state_cv: Condvar::new(),
            open_close: Mutex::new(()),
            settings: Mutex::new(()),
            alive: AtomicBool::new(true),
            kill: AtomicBool::new(false),
            rx_blocked: AtomicBool::new(false),
            last_used: Mutex::new(None),
        }))
    }

    /// Returns the unit number assigned at construction.
    #[must_use]
    pub fn unit(&self) -> u32 {
        self.unit
    }

    /// Returns the device identifier of `variant`'s session.
    #[must_use]
    pub fn device_id(&self, variant: Variant) -> DeviceId {
        DeviceId::for_unit(self.config.major, self.unit, variant)
    }

    /// Returns the device-node name of `variant`'s session.
    #[must_use]
    pub fn node_name(&self, variant: Variant) -> String {
        let prefix = match variant {
            Variant::DialIn => "tty",
            Variant::CallOut => "cu",
        };
        format!("{prefix}.{}{}", self.config.base_name, self.unit)
    }

    /// Returns the variant currently holding the port.
    #[must_use]
    pub fn active_session(&self) -> Option<Variant> {
        lock(&self.state).active
    }

    /// Returns `true` while either worker thread is running.
    #[must_use]
    pub fn workers_running(&self) -> bool {
        let st = lock(&self.state);
        st.rx_running || st.tx_running
    }

    pub(crate) fn session(&self, variant: Variant) -> &Session {
        &self.sessions[variant.index()]
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.kill.load(Ordering::Acquire)
    }

    pub(crate) fn stamp_last_used(&self) {
        *lock(&self.last_used) = Some(Instant::now());
    }

    pub(crate) fn notify(&self) {
        self.state_cv.notify_all();
    }

    /// Waits on the state condition variable for one poll interval.
    ///
    /// # Errors
    ///
    /// [`SessionError::Interrupted`] once the caller's flag is raised.
    pub(crate) fn wait_interruptible<'a>(
        &self,
        guard: MutexGuard<'a, ManagerState>,
        caller: &Caller,
    ) -> Result<MutexGuard<'a, ManagerState>, SessionError> {
        if caller.interrupted() {
            return Err(SessionError::Interrupted);
        }
        let guard = wait_timeout(&self.state_cv, guard, self.config.interrupt_poll());
        if caller.interrupted() {
            return Err(SessionError::Interrupted);
        }
        Ok(guard)
    }

    /// Sleeps for `duration`, checking the caller's flag every poll interval.
    pub(crate) fn sleep_interruptible(
        &self,
        duration: Duration,
        caller: &Caller,
    ) -> Result<(), SessionError> {
        let deadline = Instant::now().checked_add(duration);
        let mut st = lock(&self.state);
        loop {
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => return Ok(()),
                Some(deadline) => deadline - now,
                None => duration,
            };
            if caller.interrupted() {
                return Err(SessionError::Interrupted);
            }
            let slice = remaining.min(self.config.interrupt_poll());
            st = wait_timeout(&self.state_cv, st, slice);
        }
    }

    // -----------------------------------------------------------------------
    // Device wrappers
    // -----------------------------------------------------------------------

    /// Logs a device failure at the severity its kind warrants and converts it.
    pub(crate) fn device_failure(&self, what: &str, err: PortError) -> SessionError {
        if err.is_offline() {
            log::debug!("tether{}: {what}: {err}", self.unit);
        } else {
            log::error!("tether{}: {what} failed: {err}", self.unit);
        }
        SessionError::from(err)
    }

    /// Executes `command` on behalf of `session`.
    pub(crate) fn session_execute(
        &self,
        session: &Session,
        command: PortCommand,
    ) -> Result<(), SessionError> {
        if session.error().is_some() {
            return Err(SessionError::Offline);
        }
        self.port
            .execute(command)
            .map_err(|err| self.device_failure("execute", err))
    }

    /// Sets state bits on behalf of `session`.
    pub(crate) fn session_set_state(
        &self,
        session: &Session,
        state: PortState,
        mask: PortState,
    ) -> Result<(), SessionError> {
        if session.error().is_some() {
            return Err(SessionError::Offline);
        }
        self.port
            .set_state(state, mask)
            .map_err(|err| self.device_failure("set_state", err))
    }

    /// Returns the active session, or [`SessionError::Offline`] if `variant`
    /// does not hold the port.
    pub(crate) fn active_as(&self, variant: Variant) -> Result<&Session, SessionError> {
        let session = self.session(variant);
        if let Some(err) = session.error() {
            return Err(if err == SessionError::Busy {
                SessionError::Offline
            } else {
                err
            });
        }
        if lock(&self.state).active == Some(variant) {
            Ok(session)
        } else {
            Err(SessionError::Offline)
        }
    }

    // -----------------------------------------------------------------------
    // Terminal hooks
    // -----------------------------------------------------------------------

    pub(crate) fn start_output(&self, variant: Variant) {
        if let Ok(session) = self.active_as(variant) {
            let _ = self.session_set_state(session, PortState::TX_EVENT, PortState::TX_EVENT);
        }
    }

    pub(crate) fn stop_output(&self, variant: Variant, flush: bool) {
        if !flush {
            return;
        }
        if let Ok(session) = self.active_as(variant) {
            let _ = self.session_execute(session, PortCommand::FlushTx);
        }
    }

    pub(crate) fn hooks_for(&self, variant: Variant) -> Arc<SessionHooks> {
        Arc::new(SessionHooks {
            manager: self.this.clone(),
            variant,
        })
    }

    // -----------------------------------------------------------------------
    // Data path
    // -----------------------------------------------------------------------

    /// Reads processed input from `variant`'s terminal.
    ///
    /// # Errors
    ///
    /// The session's sticky error if set, [`SessionError::BadDescriptor`] if
    /// the session was never opened, otherwise the terminal's error.
    pub fn read(
        &self,
        variant: Variant,
        buf: &mut [u8],
        nonblocking: bool,
    ) -> Result<usize, SessionError> {
        let session = self.session(variant);
        if let Some(err) = session.error() {
            return Err(err);
        }
        let tty = session.terminal().ok_or(SessionError::BadDescriptor)?;
        let count = tty.read(buf, nonblocking)?;
        if self.rx_blocked.load(Ordering::Acquire) && tty.input_queued() < tty.input_high_water() {
            let _ = self.port.set_state(PortState::RX_EVENT, PortState::RX_EVENT);
        }
        Ok(count)
    }

    /// Queues output on `variant`'s terminal.
    ///
    /// # Errors
    ///
    /// The session's sticky error if set, [`SessionError::BadDescriptor`] if
    /// the session was never opened, otherwise the terminal's error.
    pub fn write(&self, variant: Variant, buf: &[u8], nonblocking: bool) -> Result<usize, SessionError> {
        let session = self.session(variant);
        if let Some(err) = session.error() {
            return Err(err);
        }
        let tty = session.terminal().ok_or(SessionError::BadDescriptor)?;
        Ok(tty.write(buf, nonblocking)?)
    }

    /// Polls `variant`'s terminal for readiness.
    ///
    /// # Errors
    ///
    /// The session's sticky error if set, [`SessionError::BadDescriptor`] if
    /// the session was never opened.
    pub fn poll(&self, variant: Variant, events: PollFlags) -> Result<PollFlags, SessionError> {
        let session = self.session(variant);
        if let Some(err) = session.error() {
            return Err(err);
        }
        let tty = session.terminal().ok_or(SessionError::BadDescriptor)?;
        Ok(tty.poll(events))
    }

    /// Handles a control request on `variant`'s session.
    ///
    /// Requests the session manager does not interpret are delegated to the
    /// terminal.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadDescriptor`] if the session was never opened,
    /// [`SessionError::Offline`] if the session no longer holds the port,
    /// otherwise the device's or terminal's error.
    pub fn ioctl(&self, variant: Variant, request: &mut TtyRequest) -> Result<(), SessionError> {
        let session = self.session(variant);
        let tty = session.terminal().ok_or(SessionError::BadDescriptor)?;
        match request {
            TtyRequest::GetAttr(out) => {
                let mut termios = tty.termios();
                if let Ok(flow) = self.read_flow_control(variant) {
                    param::merge_flow_flags(&mut termios, flow);
                }
                *out = termios;
                Ok(())
            }
            TtyRequest::SetAttr(termios) => {
                self.apply_parameters(variant, termios)?;
                tty.store_termios(termios);
                self.optimize_input_path(variant, termios);
                Ok(())
            }
            TtyRequest::SetBreak => {
                self.session_execute(self.active_as(variant)?, PortCommand::LineBreak(true))
            }
            TtyRequest::ClearBreak => {
                self.session_execute(self.active_as(variant)?, PortCommand::LineBreak(false))
            }
            TtyRequest::SetDtr => {
                self.session_set_state(self.active_as(variant)?, PortState::DTR, PortState::DTR)
            }
            TtyRequest::ClearDtr => {
                self.session_set_state(self.active_as(variant)?, PortState::empty(), PortState::DTR)
            }
            TtyRequest::ModemGet(out) => {
                self.active_as(variant)?;
                *out = param::modem_bits(self.port.state());
                Ok(())
            }
            TtyRequest::ModemSet(bits) => {
                let outputs = param::modem_state(*bits) & param::MODEM_OUTPUTS;
                self.session_set_state(self.active_as(variant)?, outputs, param::MODEM_OUTPUTS)
            }
            TtyRequest::ModemBis(bits) => {
                let outputs = param::modem_state(*bits) & param::MODEM_OUTPUTS;
                self.session_set_state(self.active_as(variant)?, outputs, outputs)
            }
            TtyRequest::ModemBic(bits) => {
                let outputs = param::modem_state(*bits) & param::MODEM_OUTPUTS;
                self.session_set_state(self.active_as(variant)?, PortState::empty(), outputs)
            }
            TtyRequest::SetPreempt(allowed) => {
                lock(&self.state).preempt_allowed = *allowed;
                log::debug!("tether{}: preemption allowed = {allowed}", self.unit);
                Ok(())
            }
            TtyRequest::SetDataLatency(micros) => {
                self.session_execute(self.active_as(variant)?, PortCommand::DataLatency(*micros))
            }
            TtyRequest::SetSpeed(speed) => {
                let mut termios = tty.termios();
                termios.ospeed = *speed;
                termios.ispeed = *speed;
                self.apply_parameters(variant, &termios)?;
                tty.store_termios(&termios);
                Ok(())
            }
            TtyRequest::GetInitial(out) => {
                *out = session.initial();
                Ok(())
            }
            TtyRequest::SetInitial(termios) => {
                param::validate(termios)?;
                session.set_initial(termios);
                Ok(())
            }
            TtyRequest::Exclusive | TtyRequest::NonExclusive | TtyRequest::Other(_) => {
                Ok(tty.ioctl(request)?)
            }
        }
    }

    /// Settings of `variant`'s terminal, or its initial settings if it has
    /// never been opened.
    #[must_use]
    pub fn termios(&self, variant: Variant) -> Termios {
        let session = self.session(variant);
        session
            .terminal()
            .map_or_else(|| session.initial(), |tty| tty.termios())
    }
}
