#![forbid(unsafe_code)]

//! One pausable callback on one source.
//!
//! A synchronous observer flips a dirty flag on change and disarms itself, so
//! a burst of writes queues a single job. The job clears the flag, re-arms
//! the observer and calls back with the latest value.
//!
//! While paused the observer only remembers that a change happened; the
//! resume that balances the first pause turns that into one delivery with
//! the latest value. A job that runs while paused re-arms but keeps the
//! dirty flag: a bare resume stays silent and the next genuine change after
//! it is delivered.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::reactive::scheduler::{self, JobId};
use crate::reactive::{ChangeKind, Flush, Observable, Subscription};

use super::WatchOptions;

struct ControlledInner<T> {
    source: Observable<T>,
    job: JobId,
    flush: Flush,
    once: bool,
    deep: bool,
    dirty: Cell<bool>,
    armed: Cell<bool>,
    paused: Cell<u32>,
    ignore_depth: Cell<u32>,
    changed_while_paused: Cell<bool>,
    stopped: Cell<bool>,
    last: RefCell<T>,
    callback: RefCell<Box<dyn FnMut(&T, &T)>>,
    subscription: RefCell<Option<Subscription>>,
}

/// Handle for a watcher created by [`watch_controlled`].
pub struct ControlledWatcher<T> {
    inner: Rc<ControlledInner<T>>,
}

impl<T> Clone for ControlledWatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Watch `source` with a single pausable callback.
pub fn watch_controlled<T: Clone + PartialEq + 'static>(
    source: &Observable<T>,
    callback: impl FnMut(&T, &T) + 'static,
    options: WatchOptions,
) -> ControlledWatcher<T> {
    let current = source.get();
    let inner = Rc::new(ControlledInner {
        source: source.clone(),
        job: JobId::next(),
        flush: options.flush,
        once: options.once,
        deep: options.deep,
        dirty: Cell::new(false),
        armed: Cell::new(true),
        paused: Cell::new(0),
        ignore_depth: Cell::new(0),
        changed_while_paused: Cell::new(false),
        stopped: Cell::new(false),
        last: RefCell::new(current.clone()),
        callback: RefCell::new(Box::new(callback)),
        subscription: RefCell::new(None),
    });
    let watcher = ControlledWatcher { inner };

    if options.immediate {
        {
            let mut callback = watcher.inner.callback.borrow_mut();
            callback(&current, &current);
        }
        if options.once {
            watcher.inner.stopped.set(true);
            return watcher;
        }
    }
    if scheduler::is_headless() {
        watcher.inner.stopped.set(true);
        return watcher;
    }

    let weak = Rc::downgrade(&watcher.inner);
    let subscription = source.observe(move |_, kind| {
        if let Some(inner) = weak.upgrade() {
            ControlledInner::on_change(&inner, kind);
        }
    });
    *watcher.inner.subscription.borrow_mut() = Some(subscription);
    watcher
}

impl<T: Clone + PartialEq + 'static> ControlledInner<T> {
    fn on_change(this: &Rc<Self>, kind: ChangeKind) {
        if this.stopped.get() || this.ignore_depth.get() > 0 || !(this.deep || kind.is_shallow())
        {
            return;
        }
        if this.paused.get() > 0 {
            this.changed_while_paused.set(true);
            return;
        }
        Self::mark_dirty(this);
    }

    fn mark_dirty(this: &Rc<Self>) {
        if !this.armed.replace(false) {
            return;
        }
        this.dirty.set(true);
        let weak = Rc::downgrade(this);
        scheduler::schedule(
            this.job,
            this.flush,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.run();
                }
            }),
        );
    }

    fn run(&self) {
        if self.stopped.get() || !self.dirty.get() {
            return;
        }
        self.armed.set(true);
        if self.paused.get() > 0 {
            return;
        }
        self.dirty.set(false);
        if self.once {
            self.stop();
        }
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            tracing::warn!("controlled watcher callback re-entered; delivery skipped");
            return;
        };
        let new = self.source.get();
        let old = self.last.replace(new.clone());
        callback(&new, &old);
    }

    fn stop(&self) {
        self.stopped.set(true);
        self.dirty.set(false);
        self.changed_while_paused.set(false);
        let subscription = self.subscription.borrow_mut().take();
        drop(subscription);
    }
}

impl<T: Clone + PartialEq + 'static> ControlledWatcher<T> {
    /// Suspend delivery. Nests.
    pub fn pause(&self) {
        self.inner.paused.set(self.inner.paused.get() + 1);
    }

    /// Undo one [`pause`](Self::pause). The resume that balances the first
    /// pause delivers a change made while paused, once.
    pub fn resume(&self) {
        let depth = self.inner.paused.get();
        if depth == 0 {
            tracing::debug!("unbalanced resume ignored");
            return;
        }
        self.inner.paused.set(depth - 1);
        if depth == 1 && self.inner.changed_while_paused.replace(false) && !self.is_stopped() {
            tracing::trace!("replaying change made while paused");
            ControlledInner::mark_dirty(&self.inner);
        }
    }

    /// Run `f`; source writes made inside it are not delivered.
    pub fn ignore<R>(&self, f: impl FnOnce() -> R) -> R {
        let depth = &self.inner.ignore_depth;
        depth.set(depth.get() + 1);
        let _guard = IgnoreGuard(depth);
        f()
    }

    /// Unsubscribe for good.
    pub fn stop(&self) {
        self.inner.stop();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.get() > 0
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Whether a change is waiting to be delivered.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }
}

struct IgnoreGuard<'a>(&'a Cell<u32>);

impl Drop for IgnoreGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl<T> fmt::Debug for ControlledWatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledWatcher")
            .field("dirty", &self.inner.dirty.get())
            .field("paused", &self.inner.paused.get())
            .field("stopped", &self.inner.stopped.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting() -> (Rc<Cell<u32>>, Rc<RefCell<Vec<i32>>>, impl FnMut(&i32, &i32) + 'static) {
        let count = Rc::new(Cell::new(0));
        let values = Rc::new(RefCell::new(Vec::new()));
        let (c, v) = (Rc::clone(&count), Rc::clone(&values));
        (count, values, move |new: &i32, _: &i32| {
            c.set(c.get() + 1);
            v.borrow_mut().push(*new);
        })
    }

    #[test]
    fn coalesces_burst() {
        let source = Observable::new(0);
        let (count, values, cb) = counting();
        let _w = watch_controlled(&source, cb, WatchOptions::default());
        source.set(1);
        source.set(2);
        scheduler::flush();
        assert_eq!(count.get(), 1);
        assert_eq!(*values.borrow(), vec![2]);
    }

    #[test]
    fn paused_burst_is_delivered_once_on_resume() {
        let source = Observable::new(0);
        let (count, values, cb) = counting();
        let w = watch_controlled(&source, cb, WatchOptions::default());
        w.pause();
        w.pause();
        source.set(1);
        source.set(2);
        scheduler::flush();
        w.resume();
        scheduler::flush();
        assert_eq!(count.get(), 0);

        w.resume();
        scheduler::flush();
        scheduler::flush();
        assert_eq!(count.get(), 1);
        assert_eq!(*values.borrow(), vec![2]);

        w.pause();
        w.resume();
        scheduler::flush();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn ignore_recovers_from_panic() {
        let source = Observable::new(0);
        let (count, _, cb) = counting();
        let w = watch_controlled(&source, cb, WatchOptions::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            w.ignore::<()>(|| panic!("boom"));
        }));
        assert!(result.is_err());
        source.set(1);
        scheduler::flush();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn pause_mid_flight_keeps_dirty_until_new_change() {
        let source = Observable::new(0);
        let (count, values, cb) = counting();
        let w = watch_controlled(&source, cb, WatchOptions::default());

        source.set(1);
        w.pause();
        scheduler::flush();
        assert!(w.is_dirty());
        w.resume();
        scheduler::flush();
        assert_eq!(count.get(), 0);

        source.set(2);
        scheduler::flush();
        assert_eq!(count.get(), 1);
        assert_eq!(*values.borrow(), vec![2]);
        assert!(!w.is_dirty());
    }

    #[test]
    fn ignore_suppresses_writes() {
        let source = Observable::new(0);
        let (count, _, cb) = counting();
        let w = watch_controlled(&source, cb, WatchOptions::default());
        w.ignore(|| source.set(5));
        scheduler::flush();
        assert_eq!(count.get(), 0);
        source.set(6);
        scheduler::flush();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn once_and_stop() {
        let source = Observable::new(0);
        let (count, _, cb) = counting();
        let w = watch_controlled(&source, cb, WatchOptions::default().sync().once());
        source.set(1);
        source.set(2);
        assert_eq!(count.get(), 1);
        assert!(w.is_stopped());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn immediate_and_headless() {
        let _headless = scheduler::enter_headless();
        let source = Observable::new(3);
        let (count, values, cb) = counting();
        let w = watch_controlled(&source, cb, WatchOptions::default().immediate());
        source.set(4);
        scheduler::flush();
        assert_eq!(count.get(), 1);
        assert_eq!(*values.borrow(), vec![3]);
        assert!(w.is_stopped());
    }
}
