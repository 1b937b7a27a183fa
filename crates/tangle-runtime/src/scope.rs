#![forbid(unsafe_code)]

//! Lifecycle scopes.
//!
//! A [`Scope`] stands in for the UI component that owns a set of watchers,
//! models and subscriptions. When the scope is disposed (explicitly or by
//! drop) everything it holds is torn down in reverse order of adoption:
//! watchers stop, debounced validations are cancelled, subscriptions drop.
//!
//! # Invariants
//!
//! 1. Disposal runs at most once.
//! 2. Items adopted after disposal are disposed immediately.

use std::cell::{Cell, RefCell};
use std::fmt;

use crate::model::{Model, ModelGroup, ModelValue};
use crate::reactive::Subscription;
use crate::watch::{ControlledWatcher, StopHandle, Watchers};

/// Something a [`Scope`] can tear down.
pub trait Disposable {
    fn dispose(&self);
}

impl Disposable for StopHandle {
    fn dispose(&self) {
        self.stop();
    }
}

impl<T: Clone + PartialEq + 'static> Disposable for Watchers<T> {
    fn dispose(&self) {
        self.stop();
    }
}

impl<T: Clone + PartialEq + 'static> Disposable for ControlledWatcher<T> {
    fn dispose(&self) {
        self.stop();
    }
}

impl<T: ModelValue> Disposable for Model<T> {
    fn dispose(&self) {
        Model::dispose(self);
    }
}

impl Disposable for ModelGroup {
    fn dispose(&self) {
        ModelGroup::dispose(self);
    }
}

enum Entry {
    Subscription(Subscription),
    Disposable(Box<dyn Disposable>),
}

/// Owner of disposable resources.
#[derive(Default)]
pub struct Scope {
    entries: RefCell<Vec<Entry>>,
    disposed: Cell<bool>,
}

impl Scope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `subscription` alive until the scope ends.
    pub fn hold(&self, subscription: Subscription) {
        if self.disposed.get() {
            tracing::debug!("subscription held by a disposed scope; dropping it");
            return;
        }
        self.entries
            .borrow_mut()
            .push(Entry::Subscription(subscription));
    }

    /// Dispose `item` when the scope ends.
    pub fn adopt(&self, item: impl Disposable + 'static) {
        if self.disposed.get() {
            tracing::debug!("item adopted by a disposed scope; disposing now");
            item.dispose();
            return;
        }
        self.entries
            .borrow_mut()
            .push(Entry::Disposable(Box::new(item)));
    }

    /// Number of held items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Tear everything down, newest first.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        tracing::debug!(items = entries.len(), "scope disposed");
        for entry in entries.into_iter().rev() {
            match entry {
                Entry::Subscription(subscription) => drop(subscription),
                Entry::Disposable(item) => item.dispose(),
            }
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("items", &self.len())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}
