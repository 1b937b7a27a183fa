#![forbid(unsafe_code)]

//! tangle public facade crate.
//!
//! Pausable multi-callback watchers and validated form models over
//! single-threaded reactive cells.

pub use tangle_core as core;
pub use tangle_runtime as runtime;

pub use tangle_core::{Clock, Cx, CxError, LabClock};
pub use tangle_runtime::{
    Computed, ControlledWatcher, Deferred, DebouncedValidation, Disposable, Entangled, Error,
    Field, FilterAction, Flush, Interaction, Model, ModelGroup, ModelState, Observable, Result,
    RuntimeConfig, Scope, Settled, StopHandle, Subscription, Validation, ValidationAbort,
    WatchOptions, Watchers, WatchersOptions, use_model, use_model_group, use_watchers,
    watch_controlled,
};
pub use tangle_runtime::reactive::scheduler;

/// Payload values produced by models and groups.
pub type Value = serde_json::Value;

pub mod prelude {
    pub use tangle_core as core;
    pub use tangle_runtime as runtime;

    pub use crate::scheduler;
    pub use crate::{
        Entangled, Field, FilterAction, Flush, Model, ModelGroup, Observable, Scope, StopHandle,
        Validation, ValidationAbort, WatchOptions, Watchers, WatchersOptions, use_model,
        use_model_group, use_watchers, watch_controlled,
    };
}
