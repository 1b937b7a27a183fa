//! Logging shims.
//!
//! With the `tracing` feature the usual `tracing` macros are re-exported from
//! here. Without it, same-named macros are exported at the crate root and
//! expand to nothing, so call sites never need their own `cfg` gates:
//!
//! ```ignore
//! #[cfg(feature = "tracing")]
//! use crate::logging::warn;
//! #[cfg(not(feature = "tracing"))]
//! use crate::warn;
//! ```

#[cfg(feature = "tracing")]
pub use tracing::{debug, trace, warn};

/// No-op `debug!` used when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{}};
}

/// No-op `trace!` used when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{}};
}

/// No-op `warn!` used when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{}};
}
