#![forbid(unsafe_code)]

//! Many callbacks on one source, paused and resumed as a unit.
//!
//! # Design
//!
//! A [`Watchers<T>`] owns a list of registrations and, while it has any,
//! exactly one synchronous *gate* subscription on the source. The gate does
//! not call anyone back. On a change it marks every registration that is not
//! already pending as pending, bumps the shared pending count and queues
//! each marked registration on the scheduler. Each registration later
//! *consumes* its mark: clears it, decrements the count and, unless the
//! group is paused at that moment, calls the user callback with the latest
//! value.
//!
//! The gate counts as armed while some registration is not pending. Writes
//! that land while every registration is already pending fold into the
//! deliveries that are queued.
//!
//! # Invariants
//!
//! 1. No callback runs while the group is paused.
//! 2. Any burst of writes yields at most one delivery per registration,
//!    carrying the value current at delivery time.
//! 3. `pause`/`resume` nest; only the resume that balances the first pause
//!    resumes delivery.
//! 4. A change seen while paused is replayed once on the final resume; a
//!    resume with no change while paused delivers nothing.
//! 5. A mark consumed while paused is cleared without a callback, so a
//!    burst suspended by `pause` never resurfaces as a later notification.
//! 6. Writes inside [`Watchers::ignore`] are never delivered.
//! 7. Removing the last registration drops the gate subscription.
//!
//! # Failure Modes
//!
//! - **Callback re-entry**: a callback that synchronously triggers its own
//!   delivery again (sync flush, writing the source) is skipped with a warning
//!   instead of panicking on the inner `RefCell`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::reactive::scheduler::{self, JobId};
use crate::reactive::{ChangeKind, Flush, Observable, Subscription};

use super::{StopHandle, WatchOptions, WatchersOptions};

type Callback<T> = Box<dyn FnMut(&T, &T)>;

struct Registration<T> {
    id: u64,
    job: JobId,
    flush: Flush,
    once: bool,
    deep: bool,
    pending: Cell<bool>,
    last: RefCell<T>,
    callback: RefCell<Callback<T>>,
}

impl<T> Registration<T> {
    fn accepts(&self, kind: ChangeKind) -> bool {
        self.deep || kind.is_shallow()
    }
}

/// What the gate saw while the group was paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PausedChange {
    shallow: bool,
}

struct WatchersInner<T> {
    source: Observable<T>,
    deep: bool,
    registrations: RefCell<Vec<Rc<Registration<T>>>>,
    gate: RefCell<Option<Subscription>>,
    pending: Cell<usize>,
    paused: Cell<u32>,
    ignore_depth: Cell<u32>,
    paused_change: Cell<Option<PausedChange>>,
    next_id: Cell<u64>,
}

/// Collectively controlled watchers over one source.
///
/// Cloning yields another handle to the same group.
pub struct Watchers<T> {
    inner: Rc<WatchersInner<T>>,
}

impl<T> Clone for Watchers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Create a [`Watchers`] group over `source`.
pub fn use_watchers<T: Clone + PartialEq + 'static>(
    source: &Observable<T>,
    options: WatchersOptions,
) -> Watchers<T> {
    Watchers::new(source, options)
}

impl<T: Clone + PartialEq + 'static> Watchers<T> {
    #[must_use]
    pub fn new(source: &Observable<T>, options: WatchersOptions) -> Self {
        Self {
            inner: Rc::new(WatchersInner {
                source: source.clone(),
                deep: options.deep,
                registrations: RefCell::new(Vec::new()),
                gate: RefCell::new(None),
                pending: Cell::new(0),
                paused: Cell::new(0),
                ignore_depth: Cell::new(0),
                paused_change: Cell::new(None),
                next_id: Cell::new(1),
            }),
        }
    }

    /// The observed source.
    #[must_use]
    pub fn source(&self) -> &Observable<T> {
        &self.inner.source
    }

    /// Register `callback(new, old)`.
    ///
    /// Registrations made while the group is paused start paused. In headless
    /// mode only an `immediate` callback runs, once, and nothing is
    /// registered.
    pub fn on_updated(
        &self,
        callback: impl FnMut(&T, &T) + 'static,
        options: WatchOptions,
    ) -> StopHandle {
        let mut callback: Callback<T> = Box::new(callback);
        if scheduler::is_headless() {
            if options.immediate {
                let value = self.inner.source.get();
                callback(&value, &value);
            }
            tracing::trace!("headless watcher registration skipped");
            return StopHandle::noop();
        }

        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let current = self.inner.source.get();

        if options.immediate && !self.is_paused() {
            callback(&current, &current);
            if options.once {
                return StopHandle::noop();
            }
        }

        let registration = Rc::new(Registration {
            id,
            job: JobId::next(),
            flush: options.flush,
            once: options.once,
            deep: options.deep || self.inner.deep,
            pending: Cell::new(false),
            last: RefCell::new(current),
            callback: RefCell::new(callback),
        });
        self.inner.registrations.borrow_mut().push(registration);
        WatchersInner::ensure_gate(&self.inner);

        let weak = Rc::downgrade(&self.inner);
        StopHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(id);
            }
        })
    }

    /// Suspend delivery for every registration. Nests.
    pub fn pause(&self) {
        let depth = self.inner.paused.get() + 1;
        self.inner.paused.set(depth);
        tracing::trace!(depth, "watchers paused");
    }

    /// Undo one [`pause`](Self::pause). The resume that balances the first
    /// pause replays a change made while paused, once.
    pub fn resume(&self) {
        let depth = self.inner.paused.get();
        if depth == 0 {
            tracing::debug!("unbalanced resume ignored");
            return;
        }
        self.inner.paused.set(depth - 1);
        if depth > 1 {
            return;
        }
        if let Some(change) = self.inner.paused_change.take() {
            tracing::trace!(shallow = change.shallow, "replaying change made while paused");
            WatchersInner::fan_out(&self.inner, change.shallow);
        }
    }

    /// Run `f`; source writes made inside it are never delivered.
    pub fn ignore<R>(&self, f: impl FnOnce() -> R) -> R {
        let inner = &self.inner;
        inner.ignore_depth.set(inner.ignore_depth.get() + 1);
        let _guard = IgnoreGuard(&inner.ignore_depth);
        f()
    }

    /// Drop every registration and the gate. The group can be reused.
    pub fn stop(&self) {
        let removed: Vec<_> = std::mem::take(&mut *self.inner.registrations.borrow_mut());
        for registration in &removed {
            registration.pending.set(false);
        }
        self.inner.pending.set(0);
        self.inner.paused_change.set(None);
        let gate = self.inner.gate.borrow_mut().take();
        tracing::debug!(registrations = removed.len(), "watchers stopped");
        drop(gate);
        drop(removed);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.get() > 0
    }

    /// Whether the gate subscription is live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.gate.borrow().is_some()
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.registrations.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registrations marked by the last burst and not yet consumed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.get()
    }
}

impl<T> fmt::Debug for Watchers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchers")
            .field("registrations", &self.inner.registrations.borrow().len())
            .field("pending", &self.inner.pending.get())
            .field("paused", &self.inner.paused.get())
            .finish()
    }
}

struct IgnoreGuard<'a>(&'a Cell<u32>);

impl Drop for IgnoreGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl<T: Clone + PartialEq + 'static> WatchersInner<T> {
    fn ensure_gate(this: &Rc<Self>) {
        if this.gate.borrow().is_some() {
            return;
        }
        let weak = Rc::downgrade(this);
        let subscription = this.source.observe(move |_, kind| {
            if let Some(inner) = weak.upgrade() {
                Self::on_change(&inner, kind);
            }
        });
        *this.gate.borrow_mut() = Some(subscription);
    }

    fn on_change(this: &Rc<Self>, kind: ChangeKind) {
        if this.ignore_depth.get() > 0 {
            tracing::trace!("change inside ignore() dropped");
            return;
        }
        if this.paused.get() > 0 {
            let shallow = kind.is_shallow()
                || this.paused_change.get().is_some_and(|change| change.shallow);
            this.paused_change.set(Some(PausedChange { shallow }));
            return;
        }
        Self::fan_out(this, kind.is_shallow());
    }

    /// Mark every idle registration that accepts the change.
    fn fan_out(this: &Rc<Self>, shallow: bool) {
        let kind = if shallow {
            ChangeKind::Replaced
        } else {
            ChangeKind::Mutated
        };
        let marked: Vec<Rc<Registration<T>>> = this
            .registrations
            .borrow()
            .iter()
            .filter(|r| !r.pending.get() && r.accepts(kind))
            .cloned()
            .collect();
        Self::queue(this, marked);
    }

    fn queue(this: &Rc<Self>, marked: Vec<Rc<Registration<T>>>) {
        if marked.is_empty() {
            return;
        }
        for registration in &marked {
            registration.pending.set(true);
        }
        this.pending.set(this.pending.get() + marked.len());
        tracing::trace!(marked = marked.len(), pending = this.pending.get(), "gate fired");

        for registration in marked {
            let inner = Rc::downgrade(this);
            let reg = Rc::downgrade(&registration);
            scheduler::schedule(
                registration.job,
                registration.flush,
                Rc::new(move || consume(&inner, &reg)),
            );
        }
    }

    fn consume(this: &Rc<Self>, registration: &Rc<Registration<T>>) {
        if !registration.pending.replace(false) {
            return;
        }
        this.pending.set(this.pending.get().saturating_sub(1));
        if this.paused.get() > 0 {
            tracing::trace!(registration = registration.id, "consumed while paused");
            return;
        }
        if !this.contains(registration.id) {
            return;
        }
        if registration.once {
            this.remove(registration.id);
        }
        this.deliver(registration);
    }

    fn deliver(&self, registration: &Registration<T>) {
        let Ok(mut callback) = registration.callback.try_borrow_mut() else {
            tracing::warn!(
                registration = registration.id,
                "watcher callback re-entered; delivery skipped"
            );
            return;
        };
        let new = self.source.get();
        let old = registration.last.replace(new.clone());
        callback(&new, &old);
    }

    fn contains(&self, id: u64) -> bool {
        self.registrations.borrow().iter().any(|r| r.id == id)
    }

    fn remove(&self, id: u64) {
        let (removed, now_empty) = {
            let mut registrations = self.registrations.borrow_mut();
            let removed = registrations
                .iter()
                .position(|r| r.id == id)
                .map(|index| registrations.remove(index));
            (removed, registrations.is_empty())
        };
        if let Some(registration) = &removed {
            if registration.pending.replace(false) {
                self.pending.set(self.pending.get().saturating_sub(1));
            }
        }
        if now_empty {
            let gate = self.gate.borrow_mut().take();
            if gate.is_some() {
                tracing::trace!("last registration removed; gate released");
            }
        }
    }
}

fn consume<T: Clone + PartialEq + 'static>(
    inner: &Weak<WatchersInner<T>>,
    registration: &Weak<Registration<T>>,
) {
    if let (Some(inner), Some(registration)) = (inner.upgrade(), registration.upgrade()) {
        WatchersInner::consume(&inner, &registration);
    }
}
