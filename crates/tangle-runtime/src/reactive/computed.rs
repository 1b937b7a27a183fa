#![forbid(unsafe_code)]

//! Lazy derived values over [`Observable`] sources.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function and its cached result in shared,
//! reference-counted storage. A subscription on the source marks the cache
//! dirty; the next read recomputes. Models use this for their read-only
//! `has_errors` / `is_valid` views over the error list.
//!
//! # Invariants
//!
//! 1. A read never returns a value older than the last source write.
//! 2. The compute function runs at most once per source change.
//! 3. Version increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Re-entrant read**: a compute function that reads its own `Computed`
//!   panics on the inner `RefCell`. Derive from cells, never from yourself.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::observable::{Observable, Subscription};

struct ComputedInner<T> {
    compute: Box<dyn Fn() -> T>,
    cached: Option<T>,
    dirty: Rc<Cell<bool>>,
    version: u64,
    _subscriptions: Vec<Subscription>,
}

impl<T: Clone> ComputedInner<T> {
    fn current(&mut self) -> T {
        if let (false, Some(value)) = (self.dirty.get(), self.cached.as_ref()) {
            return value.clone();
        }
        let value = (self.compute)();
        self.cached = Some(value.clone());
        self.dirty.set(false);
        self.version += 1;
        value
    }
}

/// A memoized value derived from an [`Observable`].
///
/// Cloning a `Computed` creates a new handle to the **same** cache.
pub struct Computed<T> {
    inner: Rc<RefCell<ComputedInner<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Computed")
                .field("value", &inner.cached)
                .field("stale", &inner.dirty.get())
                .finish(),
            Err(_) => f.write_str("Computed(<computing>)"),
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Derive a value from a single observable.
    pub fn from_observable<S: Clone + PartialEq + 'static>(
        source: &Observable<S>,
        map: impl Fn(&S) -> T + 'static,
    ) -> Self {
        let dirty = Rc::new(Cell::new(true));
        let flag = Rc::clone(&dirty);
        let sub = source.subscribe(move |_| flag.set(true));
        let source = source.clone();
        Self {
            inner: Rc::new(RefCell::new(ComputedInner {
                compute: Box::new(move || source.with(&map)),
                cached: None,
                dirty,
                version: 0,
                _subscriptions: vec![sub],
            })),
        }
    }

    /// Current value, recomputed first if the source changed.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow_mut().current()
    }

    /// Whether the cached value is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().dirty.get()
    }

    /// Force the next read to recompute.
    pub fn invalidate(&self) {
        self.inner.borrow().dirty.set(true);
    }

    /// Number of recomputations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }
}
