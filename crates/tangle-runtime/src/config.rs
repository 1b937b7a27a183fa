#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is installed per thread with
//! [`scheduler::configure`](crate::reactive::scheduler::configure). It can be
//! built in code or parsed from JSON (always) or TOML (`config` feature):
//!
//! ```toml
//! max_flush_passes = 50
//! headless = false
//! default_debounce_ms = 250
//! ```
//!
//! Unknown keys are rejected; missing keys take their defaults.

use serde::Deserialize;
use web_time::Duration;

use crate::error::{Error, Result};

/// Per-thread scheduler and model defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// How many times one job may run within a single flush before it is
    /// treated as a runaway update loop and dropped.
    pub max_flush_passes: usize,
    /// Evaluate without a scheduling context: watchers deliver `immediate`
    /// callbacks once and never subscribe.
    pub headless: bool,
    /// Debounce window used by models that enable validation on input
    /// without an explicit window.
    pub default_debounce_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: 100,
            headless: false,
            default_debounce_ms: 300,
        }
    }
}

impl RuntimeConfig {
    /// Default debounce window as a `Duration`.
    #[must_use]
    pub fn default_debounce(&self) -> Duration {
        Duration::from_millis(self.default_debounce_ms)
    }

    /// Parse a JSON document.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(input).map_err(|err| Error::config(err.to_string()))?;
        config.validated()
    }

    /// Parse a TOML document.
    #[cfg(feature = "config")]
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|err| Error::config(err.to_string()))?;
        config.validated()
    }

    fn validated(self) -> Result<Self> {
        if self.max_flush_passes == 0 {
            return Err(Error::config("max_flush_passes must be at least 1"));
        }
        Ok(self)
    }
}
