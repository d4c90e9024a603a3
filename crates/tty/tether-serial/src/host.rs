//! Host services the session manager depends on.
//!
//! Everything that would otherwise reach into a kernel (thread creation,
//! deferred callbacks, terminal construction, device-node publication) goes
//! through [`HostBinding`]. The threading hooks default to `std::thread`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tether_driver_api::{DeviceId, Terminal, TerminalHooks};

use crate::error::SessionError;

/// A unit of work handed to the host.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Host integration points.
pub trait HostBinding: Send + Sync {
    /// Runs `task` on a new thread.
    ///
    /// # Errors
    ///
    /// [`SessionError::Io`] if the thread could not be created.
    fn spawn(&self, name: &str, task: Task) -> Result<(), SessionError> {
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(task)
            .map(drop)
            .map_err(|err| {
                log::error!("host: failed to spawn {name}: {err}");
                SessionError::Io
            })
    }

    /// Runs `task` once, `delay` from now.
    fn schedule_after(&self, delay: Duration, task: Task) {
        let spawned = thread::Builder::new()
            .name(String::from("tether-timer"))
            .spawn(move || {
                thread::sleep(delay);
                task();
            });
        if let Err(err) = spawned {
            log::error!("host: failed to schedule callback: {err}");
        }
    }

    /// Constructs the terminal for one session. Called at most once per
    /// session, on its first open attempt.
    ///
    /// # Errors
    ///
    /// Any error aborts the open that triggered construction.
    fn create_terminal(
        &self,
        id: DeviceId,
        hooks: Arc<dyn TerminalHooks>,
    ) -> Result<Arc<dyn Terminal>, SessionError>;

    /// Makes a device node visible under `name`.
    ///
    /// # Errors
    ///
    /// Any error fails manager start-up.
    fn publish_node(&self, id: DeviceId, name: &str) -> Result<(), SessionError> {
        let _ = (id, name);
        Ok(())
    }

    /// Removes a previously published node.
    fn remove_node(&self, id: DeviceId) {
        let _ = id;
    }

    /// Reports that a deferred termination has finished.
    fn termination_complete(&self, id: DeviceId) {
        let _ = id;
    }
}
