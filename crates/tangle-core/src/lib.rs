#![forbid(unsafe_code)]

//! Core primitives shared by the tangle crates.
//!
//! - [`clock`]: wall-clock and manually advanced lab time.
//! - [`cx`]: cancellation context carrying an abort reason.
//! - [`logging`]: `tracing` re-exports, or no-op macros when the `tracing`
//!   feature is off.

pub mod clock;
pub mod cx;
pub mod logging;

pub use clock::{Clock, LabClock};
pub use cx::{Cx, CxController, CxError};
