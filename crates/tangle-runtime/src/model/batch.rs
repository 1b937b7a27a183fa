#![forbid(unsafe_code)]

//! Shared error-notification batch for one group validation pass.
//!
//! The first group to start validating on a thread becomes the *eldest* and
//! owns the pass. Nested and re-entrant group validations join it. Models
//! validated during the pass store their errors silently and enlist their
//! error cell; the eldest notifies each distinct cell once when it finishes.
//!
//! The pass is taken out of the thread-local before any cell is notified, so
//! an observer that starts another validation opens a fresh pass.

use std::cell::RefCell;

use ahash::AHashSet;

use crate::reactive::{CellId, Observable};

#[derive(Default)]
struct ValidationPass {
    cells: Vec<Observable<Vec<String>>>,
    seen: AHashSet<CellId>,
}

thread_local! {
    static PASS: RefCell<Option<ValidationPass>> = const { RefCell::new(None) };
}

/// Participation in the current pass. Only the eldest guard flushes.
pub(crate) struct PassGuard {
    eldest: bool,
}

/// Open a pass, or join the one already running.
pub(crate) fn begin() -> PassGuard {
    let eldest = PASS.with(|pass| {
        let mut pass = pass.borrow_mut();
        if pass.is_some() {
            false
        } else {
            *pass = Some(ValidationPass::default());
            true
        }
    });
    PassGuard { eldest }
}

/// Add `cell` to the running pass. Returns `false` when no pass is running.
pub(crate) fn enlist(cell: &Observable<Vec<String>>) -> bool {
    PASS.with(|pass| match pass.borrow_mut().as_mut() {
        Some(pass) => {
            if pass.seen.insert(cell.id()) {
                pass.cells.push(cell.clone());
            }
            true
        }
        None => false,
    })
}

/// Whether a pass is running on this thread.
#[must_use]
pub fn is_active() -> bool {
    PASS.with(|pass| pass.borrow().is_some())
}

impl PassGuard {
    pub(crate) fn is_eldest(&self) -> bool {
        self.eldest
    }

    fn release(&mut self) -> Option<ValidationPass> {
        if !std::mem::replace(&mut self.eldest, false) {
            return None;
        }
        PASS.try_with(|pass| pass.borrow_mut().take()).ok().flatten()
    }

    /// End the pass. The eldest notifies every enlisted cell once and
    /// returns how many there were; joiners return 0.
    pub(crate) fn finish(mut self) -> usize {
        let Some(pass) = self.release() else {
            return 0;
        };
        let notified = pass.cells.len();
        for cell in pass.cells {
            cell.trigger();
        }
        notified
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        // Unwinding out of a validator: discard without notifying.
        drop(self.release());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn eldest_notifies_each_cell_once() {
        let cell = Observable::new(Vec::<String>::new());
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = cell.subscribe(move |_| h.set(h.get() + 1));

        let outer = begin();
        assert!(outer.is_eldest());
        let inner = begin();
        assert!(!inner.is_eldest());
        assert!(enlist(&cell));
        assert!(enlist(&cell.clone()));
        assert_eq!(inner.finish(), 0);
        assert_eq!(hits.get(), 0);
        assert_eq!(outer.finish(), 1);
        assert_eq!(hits.get(), 1);
        assert!(!is_active());
    }

    #[test]
    fn enlist_without_pass() {
        let cell = Observable::new(Vec::<String>::new());
        assert!(!enlist(&cell));
    }

    #[test]
    fn dropped_guard_discards_pass() {
        let cell = Observable::new(Vec::<String>::new());
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = cell.subscribe(move |_| h.set(h.get() + 1));
        {
            let _guard = begin();
            enlist(&cell);
        }
        assert!(!is_active());
        assert_eq!(hits.get(), 0);
    }
}
