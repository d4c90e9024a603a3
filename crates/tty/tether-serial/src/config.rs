//! Session-manager configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! major = 18
//! preempt_idle_ms = 2000
//! dcd_delay_ms = 10
//! base_name = "serial"
//! ```

use core::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Upper bound for every millisecond setting: one hour.
const MAX_DELAY_MS: u64 = 60 * 60 * 1000;

/// Tunables for a [`SerialManager`](crate::SerialManager).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Character-device major number.
    pub major: u32,
    /// Number of registry slots added when the table is exhausted.
    pub registry_growth: usize,
    /// Time after the last port activity during which preemption is refused.
    pub preempt_idle_ms: u64,
    /// Carrier-detect debounce delay.
    pub dcd_delay_ms: u64,
    /// Largest chunk moved from the port to the terminal in one step.
    pub rx_chunk: usize,
    /// Largest chunk moved from the terminal to the port in one step.
    pub tx_chunk: usize,
    /// Interval at which blocking waits check for interruption.
    pub interrupt_poll_ms: u64,
    /// Base name for device nodes (`tty.<base>`, `cu.<base>`).
    pub base_name: String,
    /// Speed of a session's initial settings.
    pub default_speed: u32,
    /// Whether the dial-in session may be preempted before any request says so.
    pub preempt_allowed: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            major: 18,
            registry_growth: 16,
            preempt_idle_ms: 2000,
            dcd_delay_ms: 10,
            rx_chunk: 1024,
            tx_chunk: 1024,
            interrupt_poll_ms: 50,
            base_name: String::from("serial"),
            default_speed: 9600,
            preempt_allowed: false,
        }
    }
}

impl SessionConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry_growth == 0 {
            return Err(ConfigError::Invalid("registry_growth"));
        }
        if self.rx_chunk == 0 {
            return Err(ConfigError::Invalid("rx_chunk"));
        }
        if self.tx_chunk == 0 {
            return Err(ConfigError::Invalid("tx_chunk"));
        }
        if self.interrupt_poll_ms == 0 || self.interrupt_poll_ms > MAX_DELAY_MS {
            return Err(ConfigError::Invalid("interrupt_poll_ms"));
        }
        if self.preempt_idle_ms > MAX_DELAY_MS {
            return Err(ConfigError::Invalid("preempt_idle_ms"));
        }
        if self.dcd_delay_ms > MAX_DELAY_MS {
            return Err(ConfigError::Invalid("dcd_delay_ms"));
        }
        if self.base_name.is_empty() {
            return Err(ConfigError::Invalid("base_name"));
        }
        Ok(())
    }

    pub(crate) fn preempt_idle(&self) -> Duration {
        Duration::from_millis(self.preempt_idle_ms)
    }

    pub(crate) fn dcd_delay(&self) -> Duration {
        Duration::from_millis(self.dcd_delay_ms)
    }

    pub(crate) fn interrupt_poll(&self) -> Duration {
        Duration::from_millis(self.interrupt_poll_ms)
    }
}

/// Configuration loading failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The document is not valid TOML for this schema.
    Parse(String),
    /// A field is out of range.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "config parse error: {msg}"),
            Self::Invalid(field) => write!(f, "invalid config value for `{field}`"),
        }
    }
}

impl std::error::Error for ConfigError {}
