#![forbid(unsafe_code)]

//! Debounced validation triggers.
//!
//! Each [`DebouncedValidation::call`] restarts a `min_wait` timer and returns
//! a [`Deferred<bool>`]. All calls made inside one quiet window share a
//! cancellation context. When the timer fires the model validates once and
//! every deferred of the window resolves with the result. Cancelling aborts
//! the window's context, rejecting every outstanding deferred with the given
//! reason.
//!
//! A zero `min_wait` gives the eager form: validate right away if forced or
//! the model already has errors, otherwise report the current validity.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tangle_core::cx::{Cx, CxController};
use web_time::Duration;

use crate::deferred::{Deferred, Resolver};
use crate::reactive::scheduler::{self, TimerId};

use super::ModelOps;

struct Window {
    cx: Cx,
    ctrl: CxController,
    resolvers: Vec<Resolver<bool>>,
}

#[derive(Default)]
pub(crate) struct DebounceState {
    timer: Option<TimerId>,
    force: bool,
    window: Option<Window>,
}

impl DebounceState {
    pub(crate) fn is_open(&self) -> bool {
        self.window.is_some()
    }
}

/// Cancel whatever `state` has in flight. Returns whether anything was.
pub(crate) fn cancel_state(state: &RefCell<DebounceState>, reason: &str) -> bool {
    let (timer, window) = {
        let mut state = state.borrow_mut();
        state.force = false;
        (state.timer.take(), state.window.take())
    };
    if let Some(timer) = timer {
        scheduler::clear_timeout(timer);
    }
    match window {
        Some(window) => {
            tracing::debug!(
                cx_id = window.cx.id(),
                waiters = window.resolvers.len(),
                reason,
                "debounced validation cancelled"
            );
            window.ctrl.abort(reason);
            true
        }
        None => false,
    }
}

/// Cancelable, time-debounced trigger into a model's validation.
#[derive(Clone)]
pub struct DebouncedValidation {
    model: Weak<dyn ModelOps>,
    min_wait: Duration,
    state: Rc<RefCell<DebounceState>>,
}

impl DebouncedValidation {
    pub(crate) fn new(model: Weak<dyn ModelOps>, min_wait: Duration) -> Self {
        Self {
            model,
            min_wait,
            state: Rc::new(RefCell::new(DebounceState::default())),
        }
    }

    /// Request a validation. `force` re-runs the validator even if the value
    /// is unchanged.
    pub fn call(&self, force: bool) -> Deferred<bool> {
        let Some(model) = self.model.upgrade() else {
            return Deferred::rejected("model dropped");
        };
        if self.is_eager() {
            let valid = if force || model.has_errors() {
                model.validate_with(force, true)
            } else {
                model.is_valid()
            };
            return Deferred::resolved(valid);
        }

        let (deferred, opened) = {
            let mut state = self.state.borrow_mut();
            state.force |= force;
            if let Some(timer) = state.timer.take() {
                scheduler::clear_timeout(timer);
            }
            let opened = state.window.is_none();
            let window = state.window.get_or_insert_with(|| {
                let (cx, ctrl) = Cx::background();
                Window {
                    cx,
                    ctrl,
                    resolvers: Vec::new(),
                }
            });
            let (deferred, resolver) = Deferred::pending(&window.cx);
            window.resolvers.push(resolver);
            (deferred, opened)
        };
        if opened {
            model.track_pending(Rc::downgrade(&self.state));
        }

        let state = Rc::clone(&self.state);
        let target = self.model.clone();
        let timer = scheduler::set_timeout(self.min_wait, move || fire(&state, &target));
        self.state.borrow_mut().timer = Some(timer);
        deferred
    }

    /// Abort the current window, rejecting its deferreds with `reason`.
    pub fn cancel(&self, reason: &str) -> bool {
        cancel_state(&self.state, reason)
    }

    /// Whether a window is open.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_open()
    }

    #[must_use]
    pub fn is_eager(&self) -> bool {
        self.min_wait.is_zero()
    }

    #[must_use]
    pub fn min_wait(&self) -> Duration {
        self.min_wait
    }
}

impl fmt::Debug for DebouncedValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebouncedValidation")
            .field("min_wait", &self.min_wait)
            .field("pending", &self.is_pending())
            .finish()
    }
}

fn fire(state: &Rc<RefCell<DebounceState>>, model: &Weak<dyn ModelOps>) {
    let (force, window) = {
        let mut state = state.borrow_mut();
        state.timer = None;
        (std::mem::take(&mut state.force), state.window.take())
    };
    let Some(window) = window else {
        return;
    };
    let Some(model) = model.upgrade() else {
        window.ctrl.abort("model dropped");
        return;
    };
    let valid = model.validate_with(force, true);
    tracing::trace!(valid, waiters = window.resolvers.len(), "debounced validation fired");
    for resolver in &window.resolvers {
        resolver.resolve(valid);
    }
}
