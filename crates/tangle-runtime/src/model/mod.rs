#![forbid(unsafe_code)]

//! Validated, resettable form values.
//!
//! A [`Model<T>`] couples a value cell with an error list, a validator, a
//! reset source and a [`Watchers`] group over the value. Validation is
//! memoized: re-validating an unchanged value returns the remembered result
//! without calling the validator.
//!
//! # State machine
//!
//! ```text
//!   Idle ──write──▶ Dirty { pending_validation } ──validate──▶ Valid | Invalid
//!     ▲                          ▲                                   │
//!     └──────── clear ───────────┴────────────── write ──────────────┘
//! ```
//!
//! # Writes
//!
//! [`Model::set`] is a programmatic write: it cancels debounced validations
//! in flight. [`Model::input`] is a user write and drives validation on input
//! when the model was built with one. Either way the model reports its
//! [`Interaction`] until the scheduler's next tick, so watcher callbacks in
//! the same flush can tell the two apart.
//!
//! # Example
//!
//! ```
//! use tangle_runtime::model::Model;
//!
//! let email = Model::builder(String::new())
//!     .validator(|value: &String, v| {
//!         if value.is_empty() {
//!             v.error("required");
//!         }
//!         Ok(())
//!     })
//!     .build();
//! assert!(!email.validate());
//! assert_eq!(email.errors(), vec!["required".to_string()]);
//!
//! email.set("ada@example.com".to_string());
//! assert!(email.validate());
//! ```

pub(crate) mod batch;
pub mod debounce;
pub mod group;
pub mod validation;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;
use serde_json::Value;
use web_time::Duration;

use crate::entangled::Entangled;
use crate::error::Result;
use crate::reactive::{Computed, Observable, scheduler};
use crate::watch::{StopHandle, WatchOptions, Watchers, WatchersOptions};

pub use debounce::DebouncedValidation;
pub use group::{
    AnyModel, Field, FilterAction, GroupValidated, GroupValidation, GroupValidator, ModelGroup,
    ModelGroupBuilder, use_model_group,
};
pub use validation::{Validation, ValidationAbort, Validator};

use debounce::{DebounceState, cancel_state};

/// Values a [`Model`] can hold.
pub trait ModelValue: Clone + PartialEq + Serialize + 'static {}

impl<T: Clone + PartialEq + Serialize + 'static> ModelValue for T {}

/// Who wrote the value most recently, within the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interaction {
    #[default]
    Idle,
    /// [`Model::input`].
    User,
    /// [`Model::set`], [`Model::update`] or [`Model::reset`].
    Programmatic,
}

/// Coarse validation state of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// Never validated and error free.
    Idle,
    /// The value moved since the last validation.
    Dirty { pending_validation: bool },
    Valid,
    Invalid,
}

// ---------------------------------------------------------------------------
// Type-erased operations (groups and debounce triggers)
// ---------------------------------------------------------------------------

pub(crate) trait ModelOps {
    fn validate_with(&self, force: bool, trigger: bool) -> bool;
    /// Validate as part of a group pass: memo hits restore the validator's
    /// own errors, and the error cell joins the pass.
    fn validate_in_pass(&self) -> bool;
    fn has_errors(&self) -> bool;
    fn is_valid(&self) -> bool;
    fn errors(&self) -> Vec<String>;
    fn push_error(&self, message: String);
    fn payload(&self) -> Result<Value>;
    fn reset(&self);
    fn clear(&self);
    fn dispose(&self);
    fn track_pending(&self, state: Weak<RefCell<DebounceState>>);
}

struct Memo<T> {
    value: T,
    valid: bool,
    errors: Vec<String>,
}

enum ResetSource<T> {
    Snapshot(T),
    Provider(Rc<dyn Fn() -> T>),
}

struct AutoValidation {
    _stop: StopHandle,
    trigger: DebouncedValidation,
}

struct ModelInner<T> {
    this: Weak<ModelInner<T>>,
    value: Observable<T>,
    errors: Observable<Vec<String>>,
    has_errors: Computed<bool>,
    is_valid: Computed<bool>,
    reset: ResetSource<T>,
    validator: Option<Validator<T>>,
    memo: RefCell<Option<Memo<T>>>,
    pending: RefCell<Vec<Weak<RefCell<DebounceState>>>>,
    interaction: Cell<Interaction>,
    watchers: Watchers<T>,
    auto: RefCell<Option<AutoValidation>>,
    runs: Cell<u64>,
}

impl<T: ModelValue> ModelInner<T> {
    fn write(&self, value: T, interaction: Interaction) -> bool {
        if interaction == Interaction::Programmatic {
            self.cancel_pending("value changed");
        }
        self.mark(interaction);
        self.value.set(value)
    }

    fn mark(&self, interaction: Interaction) {
        self.interaction.set(interaction);
        let this = self.this.clone();
        scheduler::next_tick(move || {
            if let Some(model) = this.upgrade() {
                model.interaction.set(Interaction::Idle);
            }
        });
    }

    fn store_errors(&self, errors: Vec<String>) {
        self.errors.set_silent(errors);
        self.has_errors.invalidate();
        self.is_valid.invalidate();
    }

    fn memo_hit(&self, value: &T) -> Option<(bool, Vec<String>)> {
        self.memo
            .borrow()
            .as_ref()
            .filter(|memo| memo.value == *value)
            .map(|memo| (memo.valid, memo.errors.clone()))
    }

    fn run(&self, value: T) -> bool {
        self.cancel_pending("superseded by validation");
        let errors = match &self.validator {
            Some(validator) => validation::run_validator(validator, &value),
            None => Vec::new(),
        };
        self.runs.set(self.runs.get() + 1);
        let valid = errors.is_empty();
        tracing::debug!(valid, errors = errors.len(), "model validated");
        *self.memo.borrow_mut() = Some(Memo {
            value,
            valid,
            errors: errors.clone(),
        });
        self.store_errors(errors);
        valid
    }

    fn cancel_pending(&self, reason: &str) {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for state in pending.iter().filter_map(Weak::upgrade) {
            cancel_state(&state, reason);
        }
    }

    fn has_pending_validation(&self) -> bool {
        self.pending
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .any(|state| state.borrow().is_open())
    }
}

impl<T: ModelValue> ModelOps for ModelInner<T> {
    fn validate_with(&self, force: bool, trigger: bool) -> bool {
        let value = self.value.get();
        if !force && self.memo_hit(&value).is_some() {
            // Errors pushed by a group validator since the memo was taken
            // still count.
            let valid = self.is_valid.get();
            tracing::trace!(valid, "validation memo hit");
            return valid;
        }
        let valid = self.run(value);
        if trigger && !batch::enlist(&self.errors) {
            self.errors.trigger();
        }
        valid
    }

    fn validate_in_pass(&self) -> bool {
        let value = self.value.get();
        let valid = match self.memo_hit(&value) {
            Some((valid, errors)) => {
                self.store_errors(errors);
                valid
            }
            None => self.run(value),
        };
        if !batch::enlist(&self.errors) {
            self.errors.trigger();
        }
        valid
    }

    fn has_errors(&self) -> bool {
        self.has_errors.get()
    }

    fn is_valid(&self) -> bool {
        self.is_valid.get()
    }

    fn errors(&self) -> Vec<String> {
        self.errors.get()
    }

    fn push_error(&self, message: String) {
        let mut errors = self.errors.get();
        errors.push(message);
        self.store_errors(errors);
        if !batch::enlist(&self.errors) {
            self.errors.trigger();
        }
    }

    fn payload(&self) -> Result<Value> {
        Ok(self.value.with(|value| serde_json::to_value(value))?)
    }

    fn reset(&self) {
        let value = match &self.reset {
            ResetSource::Snapshot(snapshot) => snapshot.clone(),
            ResetSource::Provider(provide) => provide(),
        };
        self.write(value, Interaction::Programmatic);
    }

    fn clear(&self) {
        self.cancel_pending("cleared");
        self.memo.borrow_mut().take();
        self.errors.set(Vec::new());
    }

    fn dispose(&self) {
        self.cancel_pending("disposed");
        let auto = self.auto.borrow_mut().take();
        drop(auto);
        self.watchers.stop();
    }

    fn track_pending(&self, state: Weak<RefCell<DebounceState>>) {
        let mut pending = self.pending.borrow_mut();
        pending.retain(|w| w.strong_count() > 0);
        if !pending.iter().any(|w| w.ptr_eq(&state)) {
            pending.push(state);
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// One validated, resettable reactive value.
///
/// Cloning yields another handle to the same model.
pub struct Model<T> {
    inner: Rc<ModelInner<T>>,
}

impl<T> Clone for Model<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Shorthand for a model with a validator.
pub fn use_model<T: ModelValue>(
    value: T,
    validator: impl Fn(&T, &mut Validation) -> std::result::Result<(), ValidationAbort> + 'static,
) -> Model<T> {
    Model::builder(value).validator(validator).build()
}

impl<T: ModelValue> Model<T> {
    /// A model without a validator (always valid).
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::builder(value).build()
    }

    #[must_use]
    pub fn builder(value: T) -> ModelBuilder<T> {
        ModelBuilder {
            value,
            validator: None,
            reset: None,
            debounce: None,
            deep: false,
        }
    }

    // ---- values ----

    /// Clone of the current value.
    #[must_use]
    pub fn value(&self) -> T {
        self.inner.value.get()
    }

    /// Borrow the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.value.with(f)
    }

    /// Programmatic write. Cancels debounced validations in flight.
    pub fn set(&self, value: T) -> bool {
        self.inner.write(value, Interaction::Programmatic)
    }

    /// Programmatic in-place mutation.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        self.inner.cancel_pending("value changed");
        self.inner.mark(Interaction::Programmatic);
        self.inner.value.update(f)
    }

    /// User-driven write.
    pub fn input(&self, value: T) -> bool {
        self.inner.write(value, Interaction::User)
    }

    /// Restore the reset snapshot (or the reset provider's value).
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// Who wrote last within the current tick.
    #[must_use]
    pub fn interaction(&self) -> Interaction {
        self.inner.interaction.get()
    }

    /// Whether the last write this tick came from the user.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        self.interaction() == Interaction::User
    }

    // ---- validation ----

    /// Validate if the value changed since the last validation, notifying
    /// the error cell.
    pub fn validate(&self) -> bool {
        self.inner.validate_with(false, true)
    }

    /// Always run the validator.
    pub fn force_validate(&self) -> bool {
        self.inner.validate_with(true, true)
    }

    /// Validate with explicit `force` and `trigger` flags.
    ///
    /// With `trigger`, the error cell notifies even when the list is
    /// unchanged.
    pub fn validate_with(&self, force: bool, trigger: bool) -> bool {
        self.inner.validate_with(force, trigger)
    }

    /// Empty the error list and cancel debounced validations.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// A debounced trigger into [`validate`](Self::validate). A zero
    /// `min_wait` gives the eager form.
    #[must_use]
    pub fn use_debounced_validation(&self, min_wait: Duration) -> DebouncedValidation {
        let model: Weak<dyn ModelOps> = Rc::downgrade(&self.inner) as Weak<dyn ModelOps>;
        DebouncedValidation::new(model, min_wait)
    }

    /// Cancel every debounced validation in flight with `reason`.
    pub fn cancel_pending(&self, reason: &str) {
        self.inner.cancel_pending(reason);
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.inner.errors.get()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.inner.has_errors.get()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.is_valid.get()
    }

    /// How many times the validator has run.
    #[must_use]
    pub fn validator_runs(&self) -> u64 {
        self.inner.runs.get()
    }

    #[must_use]
    pub fn state(&self) -> ModelState {
        let inner = &self.inner;
        let pending = inner.has_pending_validation();
        let (validated, current) = {
            let memo = inner.memo.borrow();
            let current = inner
                .value
                .with(|value| memo.as_ref().is_some_and(|m| m.value == *value));
            (memo.is_some(), current)
        };
        if pending || (validated && !current) {
            ModelState::Dirty {
                pending_validation: pending,
            }
        } else if self.has_errors() {
            ModelState::Invalid
        } else if validated {
            ModelState::Valid
        } else {
            ModelState::Idle
        }
    }

    // ---- cells and views ----

    #[must_use]
    pub fn value_cell(&self) -> &Observable<T> {
        &self.inner.value
    }

    #[must_use]
    pub fn errors_cell(&self) -> &Observable<Vec<String>> {
        &self.inner.errors
    }

    /// Watchers over the value.
    #[must_use]
    pub fn watchers(&self) -> &Watchers<T> {
        &self.inner.watchers
    }

    /// Frozen record exposing `value`, `errors`, `has_errors` and `is_valid`.
    pub fn props(&self) -> Result<Entangled> {
        let mut props = Entangled::new();
        props.define_cell("value", self.inner.value.clone(), true)?;
        props.define_cell("errors", self.inner.errors.clone(), true)?;
        props.define_derived("has_errors", self.inner.has_errors.clone())?;
        props.define_derived("is_valid", self.inner.is_valid.clone())?;
        props.freeze();
        Ok(props)
    }

    /// The value as JSON.
    pub fn payload(&self) -> Result<Value> {
        self.inner.payload()
    }

    /// Stop watchers and cancel pending validations.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    fn install_auto_validation(&self, min_wait: Duration) {
        let trigger = self.use_debounced_validation(min_wait);
        let model = Rc::downgrade(&self.inner);
        let debounced = trigger.clone();
        let stop = self.inner.watchers.on_updated(
            move |_, _| {
                let Some(model) = model.upgrade() else {
                    return;
                };
                if model.interaction.get() == Interaction::User {
                    let _ = debounced.call(false);
                }
            },
            WatchOptions::default(),
        );
        *self.inner.auto.borrow_mut() = Some(AutoValidation {
            _stop: stop,
            trigger,
        });
    }

    /// The trigger driving validation on input, if configured.
    #[must_use]
    pub fn auto_validation(&self) -> Option<DebouncedValidation> {
        self.inner
            .auto
            .borrow()
            .as_ref()
            .map(|auto| auto.trigger.clone())
    }

    pub(crate) fn ops(&self) -> Rc<dyn ModelOps> {
        Rc::clone(&self.inner) as Rc<dyn ModelOps>
    }

    pub(crate) fn as_any(&self) -> Rc<dyn std::any::Any> {
        Rc::clone(&self.inner) as Rc<dyn std::any::Any>
    }

    pub(crate) fn from_any(any: Rc<dyn std::any::Any>) -> Option<Self> {
        any.downcast::<ModelInner<T>>()
            .ok()
            .map(|inner| Self { inner })
    }
}

impl<T: fmt::Debug> fmt::Debug for Model<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("value", &self.inner.value)
            .field("errors", &self.inner.errors)
            .field("interaction", &self.inner.interaction.get())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder<T> {
    value: T,
    validator: Option<Validator<T>>,
    reset: Option<Rc<dyn Fn() -> T>>,
    debounce: Option<Option<Duration>>,
    deep: bool,
}

impl<T: ModelValue> ModelBuilder<T> {
    #[must_use]
    pub fn validator(
        mut self,
        validator: impl Fn(&T, &mut Validation) -> std::result::Result<(), ValidationAbort> + 'static,
    ) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    /// Reset to `provide()` instead of the initial value.
    #[must_use]
    pub fn reset_with(mut self, provide: impl Fn() -> T + 'static) -> Self {
        self.reset = Some(Rc::new(provide));
        self
    }

    /// Validate `min_wait` after the last user input.
    #[must_use]
    pub fn debounce(mut self, min_wait: Duration) -> Self {
        self.debounce = Some(Some(min_wait));
        self
    }

    /// Validate after user input using the configured default debounce.
    #[must_use]
    pub fn validate_on_input(mut self) -> Self {
        self.debounce = Some(None);
        self
    }

    /// Let watchers see in-place mutations.
    #[must_use]
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    #[must_use]
    pub fn build(self) -> Model<T> {
        let value = Observable::new(self.value.clone());
        let errors = Observable::new(Vec::<String>::new());
        let has_errors = Computed::from_observable(&errors, |e: &Vec<String>| !e.is_empty());
        let is_valid = Computed::from_observable(&errors, Vec::is_empty);
        let watchers = Watchers::new(&value, WatchersOptions { deep: self.deep });
        let reset = match self.reset {
            Some(provide) => ResetSource::Provider(provide),
            None => ResetSource::Snapshot(self.value),
        };
        let inner = Rc::new_cyclic(|this| ModelInner {
            this: this.clone(),
            value,
            errors,
            has_errors,
            is_valid,
            reset,
            validator: self.validator,
            memo: RefCell::new(None),
            pending: RefCell::new(Vec::new()),
            interaction: Cell::new(Interaction::Idle),
            watchers,
            auto: RefCell::new(None),
            runs: Cell::new(0),
        });
        let model = Model { inner };
        if let Some(min_wait) = self.debounce {
            let min_wait = min_wait.unwrap_or_else(|| scheduler::config().default_debounce());
            model.install_auto_validation(min_wait);
        }
        model
    }
}
