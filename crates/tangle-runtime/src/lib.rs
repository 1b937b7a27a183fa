#![forbid(unsafe_code)]

//! Reactive-state coordination for UI component code.
//!
//! - [`reactive`]: observable cells, computed views and the thread-local
//!   scheduler that batches side effects.
//! - [`watch`]: pausable, coalescing watchers over one cell, for one callback
//!   ([`ControlledWatcher`]) or many ([`Watchers`]).
//! - [`model`]: validated, resettable values ([`Model`]) and recursive groups
//!   of them ([`ModelGroup`]).
//! - [`entangled`]: name-keyed property records that unwrap cells.
//! - [`scope`]: lifecycle owner that tears everything down.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`); the scheduler and
//! validation batches are per thread.

pub mod config;
pub mod deferred;
pub mod entangled;
pub mod error;
pub mod model;
pub mod reactive;
pub mod scope;
pub mod watch;

pub use config::RuntimeConfig;
pub use deferred::{Deferred, Settled};
pub use entangled::Entangled;
pub use error::{Error, Result};
pub use model::{
    DebouncedValidation, Field, FilterAction, Interaction, Model, ModelGroup, ModelState,
    Validation, ValidationAbort, use_model, use_model_group,
};
pub use reactive::{Computed, Flush, Observable, Subscription};
pub use scope::{Disposable, Scope};
pub use watch::{
    ControlledWatcher, StopHandle, WatchOptions, Watchers, WatchersOptions, use_watchers,
    watch_controlled,
};
