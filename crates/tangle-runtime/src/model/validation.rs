#![forbid(unsafe_code)]

//! Validator hooks.

use std::rc::Rc;

use thiserror::Error;

/// Early-exit signal returned by [`Validation::checkpoint`].
///
/// Validators propagate it with `?`; the model recovers it and keeps the
/// errors collected so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("validation stopped at a checkpoint")]
pub struct ValidationAbort;

/// Error collector handed to a model validator.
#[derive(Debug, Default)]
pub struct Validation {
    errors: Vec<String>,
}

impl Validation {
    /// Record an error message.
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Stop here if any error has been recorded.
    ///
    /// ```
    /// # use tangle_runtime::model::{Validation, ValidationAbort};
    /// fn check(name: &String, v: &mut Validation) -> Result<(), ValidationAbort> {
    ///     if name.is_empty() {
    ///         v.error("required");
    ///     }
    ///     v.checkpoint()?;
    ///     if name.len() < 3 {
    ///         v.error("too short");
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn checkpoint(&self) -> Result<(), ValidationAbort> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationAbort)
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Errors recorded so far.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub(crate) fn into_errors(self) -> Vec<String> {
        self.errors
    }
}

/// A model validator.
pub type Validator<T> = Rc<dyn Fn(&T, &mut Validation) -> Result<(), ValidationAbort>>;

/// Run `validator` over `value` and collect its errors.
pub(crate) fn run_validator<T>(validator: &Validator<T>, value: &T) -> Vec<String> {
    let mut validation = Validation::default();
    if validator(value, &mut validation).is_err() {
        tracing::trace!(
            errors = validation.errors.len(),
            "validator stopped at checkpoint"
        );
    }
    validation.into_errors()
}
