//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tether_driver_api::lifecycle::ManagedDevice;
use tether_driver_api::port::{LineParams, RxEvent};
use tether_driver_api::terminal::{CharError, LineDiscipline, PollFlags, TtyRequest, TtyState};
use tether_driver_api::termios::ControlFlags;
use tether_driver_api::{
    DeviceId, PortCapabilities, PortCommand, PortDevice, PortError, PortState, Terminal,
    TerminalHooks, Termios, TtyError, Variant,
};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::host::{HostBinding, Task};
use crate::manager::SerialManager;
use crate::registry::DeviceRegistry;

const SETTLE: Duration = Duration::from_secs(3);

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// Polls `cond` until it holds or a few seconds pass.
pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

// ---------------------------------------------------------------------------
// MockPort
// ---------------------------------------------------------------------------

enum RxItem {
    Data(u8),
    Event(RxEvent),
}

struct PortInner {
    state: PortState,
    acquired: bool,
    commands: Vec<PortCommand>,
    rx: VecDeque<RxItem>,
    sent: Vec<u8>,
    tx_room: usize,
    reported_room: Option<usize>,
    watch_failure: Option<PortError>,
    params: LineParams,
    capabilities: PortCapabilities,
    acquires: usize,
    releases: usize,
    conflicts: usize,
}

/// Port device that transmits instantly and receives what tests inject.
pub(crate) struct MockPort {
    inner: Mutex<PortInner>,
    cv: Condvar,
}

impl MockPort {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PortInner {
                state: PortState::empty(),
                acquired: false,
                commands: Vec::new(),
                rx: VecDeque::new(),
                sent: Vec::new(),
                tx_room: 64,
                reported_room: None,
                watch_failure: None,
                params: LineParams::default(),
                capabilities: PortCapabilities::empty(),
                acquires: 0,
                releases: 0,
                conflicts: 0,
            }),
            cv: Condvar::new(),
        })
    }

    pub(crate) fn inject(&self, bytes: &[u8]) {
        guard(&self.inner)
            .rx
            .extend(bytes.iter().map(|&b| RxItem::Data(b)));
        self.cv.notify_all();
    }

    pub(crate) fn inject_event(&self, event: RxEvent) {
        guard(&self.inner).rx.push_back(RxItem::Event(event));
        self.cv.notify_all();
    }

    pub(crate) fn set_carrier(&self, on: bool) {
        guard(&self.inner).state.set(PortState::CAR, on);
        self.cv.notify_all();
    }

    pub(crate) fn set_capabilities(&self, capabilities: PortCapabilities) {
        guard(&self.inner).capabilities = capabilities;
    }

    /// Makes `tx_capacity` report `room` regardless of what `enqueue_data`
    /// will accept.
    pub(crate) fn set_reported_capacity(&self, room: usize) {
        guard(&self.inner).reported_room = Some(room);
    }

    /// Sets how many bytes each `enqueue_data` call accepts. The low-water
    /// bit follows whether there is any room.
    pub(crate) fn set_tx_room(&self, room: usize) {
        let mut inner = guard(&self.inner);
        inner.tx_room = room;
        inner.state.set(PortState::TXQ_LOW_WATER, room > 0);
        drop(inner);
        self.cv.notify_all();
    }

    /// Makes the next `watch_state` call fail with `err`.
    pub(crate) fn fail_next_watch(&self, err: PortError) {
        guard(&self.inner).watch_failure = Some(err);
        self.cv.notify_all();
    }

    pub(crate) fn sent(&self) -> Vec<u8> {
        guard(&self.inner).sent.clone()
    }

    pub(crate) fn commands(&self) -> Vec<PortCommand> {
        guard(&self.inner).commands.clone()
    }

    pub(crate) fn is_acquired(&self) -> bool {
        guard(&self.inner).acquired
    }

    pub(crate) fn acquires(&self) -> usize {
        guard(&self.inner).acquires
    }

    pub(crate) fn releases(&self) -> usize {
        guard(&self.inner).releases
    }

    /// Acquisitions attempted while the port was already held.
    pub(crate) fn conflicts(&self) -> usize {
        guard(&self.inner).conflicts
    }

    /// Simulates the transport disappearing: the port goes inactive without
    /// any carrier change.
    pub(crate) fn vanish(&self) {
        guard(&self.inner).state.remove(PortState::ACTIVE);
        self.cv.notify_all();
    }
}

impl PortDevice for MockPort {
    fn acquire_port(&self, _sleep: bool) -> Result<(), PortError> {
        let mut inner = guard(&self.inner);
        if inner.acquired {
            inner.conflicts += 1;
            return Err(PortError::Busy);
        }
        inner.acquired = true;
        inner.acquires += 1;
        inner.state.insert(PortState::ACQUIRED);
        Ok(())
    }

    fn release_port(&self) -> Result<(), PortError> {
        let mut inner = guard(&self.inner);
        if !inner.acquired {
            return Err(PortError::NotOpen);
        }
        inner.acquired = false;
        inner.releases += 1;
        inner
            .state
            .remove(PortState::ACQUIRED | PortState::ACTIVE | PortState::DTR | PortState::RTS);
        drop(inner);
        self.cv.notify_all();
        Ok(())
    }

    fn state(&self) -> PortState {
        guard(&self.inner).state
    }

    fn set_state(&self, state: PortState, mask: PortState) -> Result<(), PortError> {
        let mut inner = guard(&self.inner);
        if !inner.acquired {
            return Err(PortError::NotOpen);
        }
        inner.state = (inner.state - mask) | (state & mask);
        drop(inner);
        self.cv.notify_all();
        Ok(())
    }

    fn watch_state(
        &self,
        wanted: PortState,
        mask: PortState,
        timeout: Option<Duration>,
    ) -> Result<PortState, PortError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = guard(&self.inner);
        loop {
            if let Some(err) = inner.watch_failure.take() {
                return Err(err);
            }
            if !inner.state.contains(PortState::ACTIVE) {
                return Err(PortError::Offline);
            }
            if !((inner.state ^ wanted).complement() & mask).is_empty() {
                return Ok(inner.state);
            }
            inner = match deadline {
                None => self.cv.wait(inner).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PortError::Timeout);
                    }
                    self.cv.wait_timeout(inner, deadline - now).unwrap().0
                }
            };
        }
    }

    fn execute(&self, command: PortCommand) -> Result<(), PortError> {
        let mut inner = guard(&self.inner);
        if !inner.acquired {
            return Err(PortError::NotOpen);
        }
        inner.commands.push(command);
        match command {
            PortCommand::Activate(true) => inner
                .state
                .insert(PortState::ACTIVE | PortState::TXQ_EMPTY | PortState::TXQ_LOW_WATER),
            PortCommand::Activate(false) => inner.state.remove(PortState::ACTIVE),
            PortCommand::DataRate(rate) => inner.params.data_rate = rate,
            PortCommand::DataSize(size) => inner.params.data_size = size,
            PortCommand::Parity(parity) => inner.params.parity = parity,
            PortCommand::StopBits(stop_bits) => inner.params.stop_bits = stop_bits,
            PortCommand::FlowControl(flow) => inner.params.flow_control = flow,
            PortCommand::XonChar(c) => inner.params.xon = c,
            PortCommand::XoffChar(c) => inner.params.xoff = c,
            PortCommand::LineBreak(on) => inner.state.set(PortState::BREAK, on),
            PortCommand::TransmitEnable(on) => inner.state.set(PortState::TX_ENABLE, on),
            PortCommand::ReceiveEnable(on) => inner.state.set(PortState::RX_ENABLE, on),
            PortCommand::FlushRx => inner.rx.clear(),
            _ => {}
        }
        drop(inner);
        self.cv.notify_all();
        Ok(())
    }

    fn line_params(&self) -> Result<LineParams, PortError> {
        let inner = guard(&self.inner);
        if inner.acquired {
            Ok(inner.params)
        } else {
            Err(PortError::NotOpen)
        }
    }

    fn next_event(&self) -> Option<RxEvent> {
        match guard(&self.inner).rx.front() {
            Some(RxItem::Event(event)) => Some(*event),
            _ => None,
        }
    }

    fn dequeue_event(&self, _sleep: bool) -> Result<RxEvent, PortError> {
        let mut inner = guard(&self.inner);
        if let Some(RxItem::Event(event)) = inner.rx.front() {
            let event = *event;
            inner.rx.pop_front();
            return Ok(event);
        }
        Err(PortError::Timeout)
    }

    fn dequeue_data(&self, buf: &mut [u8], min: usize) -> Result<usize, PortError> {
        let mut count = 0;
        let mut inner = guard(&self.inner);
        loop {
            while count < buf.len() {
                match inner.rx.front() {
                    Some(RxItem::Data(byte)) => {
                        buf[count] = *byte;
                        count += 1;
                        inner.rx.pop_front();
                    }
                    _ => break,
                }
            }
            let at_event = matches!(inner.rx.front(), Some(RxItem::Event(_)));
            if count >= min || at_event || count == buf.len() {
                return Ok(count);
            }
            if !inner.state.contains(PortState::ACTIVE) {
                return Err(PortError::Offline);
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    fn tx_capacity(&self) -> Result<usize, PortError> {
        let inner = guard(&self.inner);
        if inner.acquired {
            Ok(inner.reported_room.unwrap_or(inner.tx_room))
        } else {
            Err(PortError::NotOpen)
        }
    }

    fn enqueue_data(&self, buf: &[u8], _sleep: bool) -> Result<usize, PortError> {
        let mut inner = guard(&self.inner);
        if !inner.state.contains(PortState::ACTIVE) {
            return Err(PortError::Offline);
        }
        let count = buf.len().min(inner.tx_room);
        inner.sent.extend_from_slice(&buf[..count]);
        Ok(count)
    }

    fn capabilities(&self) -> PortCapabilities {
        guard(&self.inner).capabilities
    }
}

// ---------------------------------------------------------------------------
// MockTerminal
// ---------------------------------------------------------------------------

struct TtyInner {
    state: TtyState,
    termios: Termios,
    discipline: LineDiscipline,
    input: VecDeque<u8>,
    output: VecDeque<u8>,
    char_errors: Vec<(u8, CharError)>,
    carrier_reports: Vec<bool>,
    wakeups: u64,
    opens: usize,
    fail_open: bool,
}

/// Terminal with plain byte queues and no line editing.
///
/// Hooks are never called with the internal lock held.
pub(crate) struct MockTerminal {
    id: DeviceId,
    hooks: Arc<dyn TerminalHooks>,
    high_water: usize,
    inner: Mutex<TtyInner>,
    cv: Condvar,
}

impl MockTerminal {
    fn new(id: DeviceId, hooks: Arc<dyn TerminalHooks>, high_water: usize) -> Self {
        Self {
            id,
            hooks,
            high_water,
            inner: Mutex::new(TtyInner {
                state: TtyState::empty(),
                termios: Termios::default(),
                discipline: LineDiscipline::Termios,
                input: VecDeque::new(),
                output: VecDeque::new(),
                char_errors: Vec::new(),
                carrier_reports: Vec::new(),
                wakeups: 0,
                opens: 0,
                fail_open: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> DeviceId {
        self.id
    }

    pub(crate) fn carrier_reports(&self) -> Vec<bool> {
        guard(&self.inner).carrier_reports.clone()
    }

    pub(crate) fn char_errors(&self) -> Vec<(u8, CharError)> {
        guard(&self.inner).char_errors.clone()
    }

    pub(crate) fn opens(&self) -> usize {
        guard(&self.inner).opens
    }

    pub(crate) fn set_discipline(&self, discipline: LineDiscipline) {
        guard(&self.inner).discipline = discipline;
    }

    pub(crate) fn fail_next_open(&self) {
        guard(&self.inner).fail_open = true;
    }

    /// Asks the session manager to reconfigure, as a line discipline would.
    pub(crate) fn reconfigure(&self, termios: &Termios) -> Result<(), TtyError> {
        self.hooks.reconfigure(termios)?;
        guard(&self.inner).termios = *termios;
        Ok(())
    }
}

impl Terminal for MockTerminal {
    fn state(&self) -> TtyState {
        guard(&self.inner).state
    }

    fn update_state(&self, set: TtyState, clear: TtyState) {
        let mut inner = guard(&self.inner);
        inner.state = (inner.state - clear) | set;
    }

    fn termios(&self) -> Termios {
        guard(&self.inner).termios
    }

    fn store_termios(&self, termios: &Termios) {
        guard(&self.inner).termios = *termios;
    }

    fn line_discipline(&self) -> LineDiscipline {
        guard(&self.inner).discipline
    }

    fn open(&self) -> Result<(), TtyError> {
        let mut inner = guard(&self.inner);
        if std::mem::take(&mut inner.fail_open) {
            return Err(TtyError::Io);
        }
        inner.state.insert(TtyState::ISOPEN);
        inner.opens += 1;
        Ok(())
    }

    fn close(&self) {
        let mut inner = guard(&self.inner);
        inner.state.remove(TtyState::ISOPEN | TtyState::XCLUDE);
        inner.input.clear();
        inner.output.clear();
        drop(inner);
        self.cv.notify_all();
    }

    fn read(&self, buf: &mut [u8], nonblocking: bool) -> Result<usize, TtyError> {
        let mut inner = guard(&self.inner);
        let wakeups = inner.wakeups;
        loop {
            if !inner.input.is_empty() {
                let count = buf.len().min(inner.input.len());
                for (slot, byte) in buf.iter_mut().zip(inner.input.drain(..count)) {
                    *slot = byte;
                }
                return Ok(count);
            }
            if nonblocking {
                return Err(TtyError::WouldBlock);
            }
            if inner.wakeups != wakeups {
                return Ok(0);
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    fn write(&self, buf: &[u8], _nonblocking: bool) -> Result<usize, TtyError> {
        {
            let mut inner = guard(&self.inner);
            if !inner.state.contains(TtyState::ISOPEN) {
                return Err(TtyError::Io);
            }
            inner.output.extend(buf.iter().copied());
        }
        self.hooks.start_output();
        Ok(buf.len())
    }

    fn ioctl(&self, request: &mut TtyRequest) -> Result<(), TtyError> {
        let mut inner = guard(&self.inner);
        match request {
            TtyRequest::Exclusive => inner.state.insert(TtyState::XCLUDE),
            TtyRequest::NonExclusive => inner.state.remove(TtyState::XCLUDE),
            _ => return Err(TtyError::NotTty),
        }
        Ok(())
    }

    fn poll(&self, events: PollFlags) -> PollFlags {
        let inner = guard(&self.inner);
        let mut ready = PollFlags::WRITABLE;
        ready.set(PollFlags::READABLE, !inner.input.is_empty());
        ready.set(
            PollFlags::HANGUP,
            !inner.state.contains(TtyState::CARR_ON)
                && !inner.termios.cflag.contains(ControlFlags::CLOCAL),
        );
        ready & events
    }

    fn receive_char(&self, byte: u8, error: CharError) {
        let mut inner = guard(&self.inner);
        if !error.is_empty() {
            inner.char_errors.push((byte, error));
        }
        inner.input.push_back(byte);
        drop(inner);
        self.cv.notify_all();
    }

    fn receive_raw(&self, bytes: &[u8]) -> usize {
        let mut inner = guard(&self.inner);
        let room = self.high_water.saturating_sub(inner.input.len());
        let count = bytes.len().min(room);
        inner.input.extend(bytes[..count].iter().copied());
        count
    }

    fn wake_readers(&self) {
        self.cv.notify_all();
    }

    fn input_queued(&self) -> usize {
        guard(&self.inner).input.len()
    }

    fn input_high_water(&self) -> usize {
        self.high_water
    }

    fn output_queued(&self) -> usize {
        guard(&self.inner).output.len()
    }

    fn take_output(&self, buf: &mut [u8]) -> usize {
        let mut inner = guard(&self.inner);
        let count = buf.len().min(inner.output.len());
        for (slot, byte) in buf.iter_mut().zip(inner.output.drain(..count)) {
            *slot = byte;
        }
        count
    }

    fn modem_changed(&self, carrier: bool) -> bool {
        let mut inner = guard(&self.inner);
        inner.carrier_reports.push(carrier);
        inner.state.set(TtyState::CARR_ON, carrier);
        if carrier || inner.termios.cflag.contains(ControlFlags::CLOCAL) {
            return true;
        }
        inner.wakeups += 1;
        drop(inner);
        self.cv.notify_all();
        false
    }

    fn wake_writers(&self) {}

    fn transmit_complete(&self) {}

    fn wake_all(&self) {
        guard(&self.inner).wakeups += 1;
        self.cv.notify_all();
    }
}

// ---------------------------------------------------------------------------
// MockHost
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HostInner {
    terminals: Vec<Arc<MockTerminal>>,
    nodes: Vec<(DeviceId, String)>,
    removed: Vec<DeviceId>,
    completions: Vec<DeviceId>,
}

/// Host using real threads, recording node and termination traffic.
pub(crate) struct MockHost {
    high_water: usize,
    inner: Mutex<HostInner>,
    /// While set, spawned workers wait before running.
    held: Arc<(Mutex<bool>, Condvar)>,
}

impl MockHost {
    pub(crate) fn new(high_water: usize) -> Arc<Self> {
        Arc::new(Self {
            high_water,
            inner: Mutex::new(HostInner::default()),
            held: Arc::new((Mutex::new(false), Condvar::new())),
        })
    }

    /// Holds back workers spawned from now on until [`Self::release_workers`].
    pub(crate) fn hold_workers(&self) {
        *guard(&self.held.0) = true;
    }

    pub(crate) fn release_workers(&self) {
        *guard(&self.held.0) = false;
        self.held.1.notify_all();
    }

    pub(crate) fn terminal(&self, id: DeviceId) -> Option<Arc<MockTerminal>> {
        guard(&self.inner)
            .terminals
            .iter()
            .find(|tty| tty.id() == id)
            .cloned()
    }

    pub(crate) fn nodes(&self) -> Vec<(DeviceId, String)> {
        guard(&self.inner).nodes.clone()
    }

    pub(crate) fn removed(&self) -> Vec<DeviceId> {
        guard(&self.inner).removed.clone()
    }

    pub(crate) fn completions(&self) -> Vec<DeviceId> {
        guard(&self.inner).completions.clone()
    }
}

impl HostBinding for MockHost {
    fn spawn(&self, name: &str, task: Task) -> Result<(), SessionError> {
        let held = Arc::clone(&self.held);
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let (flag, cv) = &*held;
                let mut waiting = guard(flag);
                while *waiting {
                    waiting = cv.wait(waiting).unwrap();
                }
                drop(waiting);
                task();
            })
            .map(drop)
            .map_err(|_| SessionError::Io)
    }

    fn create_terminal(
        &self,
        id: DeviceId,
        hooks: Arc<dyn TerminalHooks>,
    ) -> Result<Arc<dyn Terminal>, SessionError> {
        let tty = Arc::new(MockTerminal::new(id, hooks, self.high_water));
        guard(&self.inner).terminals.push(Arc::clone(&tty));
        Ok(tty)
    }

    fn publish_node(&self, id: DeviceId, name: &str) -> Result<(), SessionError> {
        guard(&self.inner).nodes.push((id, name.to_owned()));
        Ok(())
    }

    fn remove_node(&self, id: DeviceId) {
        guard(&self.inner).removed.push(id);
    }

    fn termination_complete(&self, id: DeviceId) {
        guard(&self.inner).completions.push(id);
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// A started manager over mock collaborators.
pub(crate) struct Fixture {
    pub(crate) port: Arc<MockPort>,
    pub(crate) host: Arc<MockHost>,
    pub(crate) registry: Arc<DeviceRegistry<SerialManager>>,
    pub(crate) manager: Arc<SerialManager>,
}

impl Fixture {
    pub(crate) fn tty(&self, variant: Variant) -> Arc<MockTerminal> {
        self.host
            .terminal(self.manager.device_id(variant))
            .expect("terminal not created")
    }
}

/// Configuration with short timers and no preemption grace period.
pub(crate) fn fast_config() -> SessionConfig {
    SessionConfig {
        preempt_idle_ms: 0,
        dcd_delay_ms: 5,
        interrupt_poll_ms: 5,
        ..SessionConfig::default()
    }
}

pub(crate) fn fixture_with(config: SessionConfig, high_water: usize) -> Fixture {
    let port = MockPort::new();
    let host = MockHost::new(high_water);
    let registry = Arc::new(DeviceRegistry::new(config.registry_growth));
    let manager = SerialManager::new(
        Arc::clone(&port) as Arc<dyn PortDevice>,
        Arc::clone(&host) as Arc<dyn HostBinding>,
        Arc::clone(&registry),
        config,
    )
    .unwrap();
    manager.start().unwrap();
    Fixture {
        port,
        host,
        registry,
        manager,
    }
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(fast_config(), 256)
}
