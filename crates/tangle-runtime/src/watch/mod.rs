#![forbid(unsafe_code)]

//! Controlled watchers: pausable, coalescing observers of one [`Observable`].
//!
//! - [`Watchers`]: many callbacks sharing one source, paused and resumed
//!   together. A single synchronous *gate* subscription detects change
//!   bursts; each registration consumes the burst at most once.
//! - [`ControlledWatcher`]: the same guarantee for exactly one callback.
//!
//! Callbacks receive `(new, old)`. Delivery timing follows
//! [`WatchOptions::flush`]; batched registrations run on the next
//! [`scheduler::flush`](crate::reactive::scheduler::flush).
//!
//! [`Observable`]: crate::reactive::Observable

pub mod controlled;
pub mod multiplexer;

use std::fmt;
use std::rc::Rc;

use crate::reactive::Flush;

pub use controlled::{ControlledWatcher, watch_controlled};
pub use multiplexer::{Watchers, use_watchers};

/// Per-registration delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchOptions {
    /// When the callback runs relative to the write.
    pub flush: Flush,
    /// Also call back once at registration with `(current, current)`.
    pub immediate: bool,
    /// Unregister after the first delivery.
    pub once: bool,
    /// Deliver in-place mutations as well as replacements.
    pub deep: bool,
}

impl WatchOptions {
    /// Set the flush timing.
    #[must_use]
    pub fn flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }

    /// Deliver synchronously.
    #[must_use]
    pub fn sync(self) -> Self {
        self.flush(Flush::Sync)
    }

    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    #[must_use]
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }
}

/// Options shared by every registration of a [`Watchers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchersOptions {
    /// Treat every registration as deep.
    pub deep: bool,
}

/// Stops one registration. Stopping twice is harmless.
#[derive(Clone)]
pub struct StopHandle {
    stop: Option<Rc<dyn Fn()>>,
}

impl StopHandle {
    pub(crate) fn new(stop: impl Fn() + 'static) -> Self {
        Self {
            stop: Some(Rc::new(stop)),
        }
    }

    /// A handle with nothing to stop (headless or already finished
    /// registrations).
    #[must_use]
    pub fn noop() -> Self {
        Self { stop: None }
    }

    /// Whether this handle controls nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.stop.is_none()
    }

    pub fn stop(&self) {
        if let Some(stop) = &self.stop {
            stop();
        }
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("noop", &self.is_noop())
            .finish()
    }
}
