#![forbid(unsafe_code)]

//! Single-threaded deferred results.
//!
//! A [`Deferred<T>`] is the consumer half of a value that arrives later (a
//! debounced validation, for instance). The producer holds the matching
//! [`Resolver`]. Cancellation flows through a [`Cx`]: aborting it, or any of
//! its ancestors, rejects every deferred derived from it with the abort
//! reason.
//!
//! A value resolved before the abort wins; a resolve after the abort is
//! ignored.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tangle_core::cx::{Cx, CxController, CxError};

/// Observable outcome of a [`Deferred`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T> {
    /// Still waiting.
    Pending,
    /// Produced a value.
    Resolved(T),
    /// Aborted before a value arrived.
    Rejected(CxError),
}

impl<T> Settled<T> {
    /// Whether the outcome is known.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Consumer half of a deferred value.
pub struct Deferred<T> {
    slot: Rc<RefCell<Option<T>>>,
    cx: Cx,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
            cx: self.cx.clone(),
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// A pending deferred whose context is a child of `parent`.
    #[must_use]
    pub fn pending(parent: &Cx) -> (Self, Resolver<T>) {
        let (cx, ctrl) = parent.child();
        let slot = Rc::new(RefCell::new(None));
        let deferred = Self {
            slot: Rc::clone(&slot),
            cx: cx.clone(),
        };
        (deferred, Resolver { slot, cx, ctrl })
    }

    /// An already resolved deferred.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        let (cx, _ctrl) = Cx::background();
        Self {
            slot: Rc::new(RefCell::new(Some(value))),
            cx,
        }
    }

    /// An already rejected deferred.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        let (cx, ctrl) = Cx::background();
        ctrl.abort(reason);
        Self {
            slot: Rc::new(RefCell::new(None)),
            cx,
        }
    }

    /// Current outcome.
    #[must_use]
    pub fn state(&self) -> Settled<T> {
        if let Some(value) = self.slot.borrow().as_ref() {
            return Settled::Resolved(value.clone());
        }
        match self.cx.check() {
            Ok(()) => Settled::Pending,
            Err(err) => Settled::Rejected(err),
        }
    }

    /// The resolved value, if any.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    /// Whether the outcome is still unknown.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.state(), Settled::Pending)
    }

    /// Context tied to this deferred.
    #[must_use]
    pub fn cx(&self) -> &Cx {
        &self.cx
    }
}

impl<T: fmt::Debug + Clone> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("cx", &self.cx.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Producer half of a deferred value.
pub struct Resolver<T> {
    slot: Rc<RefCell<Option<T>>>,
    cx: Cx,
    ctrl: CxController,
}

impl<T> Resolver<T> {
    /// Deliver the value. Returns `false` if the deferred was already
    /// settled.
    pub fn resolve(&self, value: T) -> bool {
        if self.cx.is_cancelled() {
            return false;
        }
        let mut slot = self.slot.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    /// Reject this one deferred with `reason`.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        if self.slot.borrow().is_some() {
            return false;
        }
        self.ctrl.abort(reason)
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("cx", &self.cx.id())
            .finish_non_exhaustive()
    }
}
