#![forbid(unsafe_code)]

//! Shared, version-tracked reactive cells.
//!
//! # Design
//!
//! [`Observable<T>`] stores its value, a version counter and the subscriber
//! list behind one `Rc<RefCell<..>>`. Subscribers are held as `Weak`
//! callbacks; the strong side lives in the [`Subscription`] returned to the
//! caller, so dropping the subscription is enough to stop delivery.
//!
//! Every notification carries a [`ChangeKind`]:
//!
//! - `Replaced`: [`set`](Observable::set) stored a different value.
//! - `Mutated`: [`update`](Observable::update) changed the value in place.
//!   Shallow observers skip these.
//! - `Triggered`: [`trigger`](Observable::trigger) forced a notification
//!   without (necessarily) changing anything.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per notifying mutation.
//! 2. Subscribers are notified synchronously, in registration order.
//! 3. Writing a value equal to the current one is a no-op.
//! 4. No borrow is held while callbacks run, so callbacks may read or
//!    write the cell they observe.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`Observable`] (shared by its clones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        Self(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// What kind of write produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The value was replaced by a different value.
    Replaced,
    /// The value was mutated in place.
    Mutated,
    /// Observers were poked explicitly.
    Triggered,
}

impl ChangeKind {
    /// Whether a shallow (non-deep) observer should see this change.
    #[inline]
    #[must_use]
    pub fn is_shallow(self) -> bool {
        !matches!(self, Self::Mutated)
    }
}

type Callback<T> = dyn Fn(&T, ChangeKind);

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<Callback<T>>>,
}

/// A reactive cell: write notifies registered observers.
///
/// Cloning an `Observable` creates a new handle to the **same** cell.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
    id: CellId,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            id: self.id,
        }
    }
}

/// Cells compare by identity, not by content.
impl<T> PartialEq for Observable<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("id", &self.id.0)
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
            id: CellId::next(),
        }
    }

    /// Identity shared by every clone of this cell.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Whether `other` is a handle to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this same cell (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Replace the value. Returns `true` if it changed (and observers ran).
    pub fn set(&self, value: T) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return false;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify(ChangeKind::Replaced);
        true
    }

    /// Mutate the value in place. Observers run only if the value changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            let before = inner.value.clone();
            f(&mut inner.value);
            if inner.value == before {
                return false;
            }
            inner.version += 1;
        }
        self.notify(ChangeKind::Mutated);
        true
    }

    /// Replace the value without notifying anyone.
    ///
    /// The version still advances when the value changes. Pair with
    /// [`trigger`](Self::trigger) to deliver the change later.
    pub fn set_silent(&self, value: T) {
        let mut inner = self.inner.borrow_mut();
        if inner.value != value {
            inner.value = value;
            inner.version += 1;
        }
    }

    /// Notify every observer even if nothing changed.
    pub fn trigger(&self) {
        self.inner.borrow_mut().version += 1;
        self.notify(ChangeKind::Triggered);
    }

    /// Subscribe to every change. Dropping the returned guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.observe(move |value, _| callback(value))
    }

    /// Subscribe with access to the [`ChangeKind`] of each notification.
    pub fn observe(&self, callback: impl Fn(&T, ChangeKind) + 'static) -> Subscription {
        let strong: Rc<Callback<T>> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Monotonic version; bumps on every notifying write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    fn notify(&self, kind: ChangeKind) {
        let (value, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            let callbacks: Vec<Rc<Callback<T>>> =
                inner.subscribers.iter().filter_map(Weak::upgrade).collect();
            (inner.value.clone(), callbacks)
        };
        for callback in callbacks {
            callback(&value, kind);
        }
    }
}

/// RAII guard for an [`Observable`] subscription.
///
/// The callback stays registered for as long as this guard lives.
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl Subscription {
    /// Drop the subscription explicitly.
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
