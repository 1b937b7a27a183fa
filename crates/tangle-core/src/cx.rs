//! Cancellation context (`Cx`) with abort reasons.
//!
//! A `Cx` is handed to whoever waits on a deferred result. The producer keeps
//! the companion [`CxController`] and aborts with a reason when the wait
//! should end early; every clone of the `Cx`, and every child derived from
//! it, then reports that reason through [`Cx::check`].
//!
//! # Design
//!
//! `Cx` is cheaply cloneable (`Arc` inside) and immutable from the outside.
//! The abort reason is stored once, on the first abort; later aborts are
//! ignored so waiters always see the reason that actually ended the wait.
//!
//! # Tracing
//!
//! When the `tracing` feature is active, aborts emit a `DEBUG`-level event
//! with `cx_id` and `reason` fields.
//!
//! # Example
//!
//! ```
//! use tangle_core::cx::{Cx, CxError};
//!
//! let (cx, ctrl) = Cx::background();
//! let (child, _child_ctrl) = cx.child();
//! ctrl.abort("value changed");
//! assert_eq!(
//!     child.check(),
//!     Err(CxError::Aborted { reason: "value changed".into() })
//! );
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;

#[cfg(feature = "tracing")]
use crate::logging::debug;
#[cfg(not(feature = "tracing"))]
use crate::debug;

// ─── Cx ID generation ────────────────────────────────────────────────────────

static NEXT_CX_ID: AtomicU64 = AtomicU64::new(1);

fn next_cx_id() -> u64 {
    NEXT_CX_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Metrics counters ────────────────────────────────────────────────────────

/// Total number of Cx aborts observed.
static CX_ABORTS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total abort count (for diagnostics).
#[must_use]
pub fn cx_aborts_total() -> u64 {
    CX_ABORTS_TOTAL.load(Ordering::Relaxed)
}

// ─── Inner shared state ──────────────────────────────────────────────────────

#[derive(Debug)]
struct CxInner {
    id: u64,
    cancelled: AtomicBool,
    reason: ArcSwapOption<String>,
    parent: Option<Arc<CxInner>>,
}

impl CxInner {
    /// First aborted context in the chain, walking from `self` up.
    fn aborted(&self) -> Option<&CxInner> {
        if self.cancelled.load(Ordering::Acquire) {
            return Some(self);
        }
        self.parent.as_deref().and_then(CxInner::aborted)
    }
}

// ─── Cx ──────────────────────────────────────────────────────────────────────

/// Cancellation context handle.
#[derive(Clone, Debug)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    /// Create a root context.
    #[must_use]
    pub fn background() -> (Self, CxController) {
        Self::new_inner(None)
    }

    /// Derive a child context. Aborting the parent also aborts the child
    /// (checked via chain walk); aborting the child leaves the parent live.
    #[must_use]
    pub fn child(&self) -> (Self, CxController) {
        Self::new_inner(Some(self.inner.clone()))
    }

    fn new_inner(parent: Option<Arc<CxInner>>) -> (Self, CxController) {
        let inner = Arc::new(CxInner {
            id: next_cx_id(),
            cancelled: AtomicBool::new(false),
            reason: ArcSwapOption::empty(),
            parent,
        });
        let cx = Self {
            inner: inner.clone(),
        };
        (cx, CxController { inner })
    }

    /// Unique identifier for this context (for tracing/logging).
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Check if this context (or any ancestor) has been aborted.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.aborted().is_some()
    }

    /// Reason supplied by whoever aborted this context or its nearest
    /// aborted ancestor.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        let aborted = self.inner.aborted()?;
        Some(
            aborted
                .reason
                .load_full()
                .map_or_else(|| CANCELLED.to_string(), |r| r.as_ref().clone()),
        )
    }

    /// Return `Err` if this context has been aborted.
    ///
    /// ```ignore
    /// cx.check()?;
    /// ```
    pub fn check(&self) -> Result<(), CxError> {
        match self.reason() {
            None => Ok(()),
            Some(reason) if reason == CANCELLED => Err(CxError::Cancelled),
            Some(reason) => Err(CxError::Aborted { reason }),
        }
    }
}

const CANCELLED: &str = "cancelled";

// ─── CxController ────────────────────────────────────────────────────────────

/// Control handle for a [`Cx`].
///
/// Dropping the controller does **not** abort the context; aborting is
/// always explicit.
#[derive(Debug)]
pub struct CxController {
    inner: Arc<CxInner>,
}

impl CxController {
    /// Abort the associated context with `reason`.
    ///
    /// Only the first abort records its reason. Returns `true` if this call
    /// performed the abort.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let was_cancelled = self.inner.cancelled.swap(true, Ordering::AcqRel);
        if was_cancelled {
            return false;
        }
        self.inner.reason.store(Some(Arc::new(reason.clone())));
        CX_ABORTS_TOTAL.fetch_add(1, Ordering::Relaxed);
        debug!(cx_id = self.inner.id, reason = %reason, "cx aborted");
        true
    }

    /// Abort without a specific reason.
    pub fn cancel(&self) -> bool {
        self.abort(CANCELLED)
    }

    /// Whether this context has already been aborted.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// A fresh handle to the controlled context.
    #[must_use]
    pub fn cx(&self) -> Cx {
        Cx {
            inner: self.inner.clone(),
        }
    }
}

// ─── CxError ─────────────────────────────────────────────────────────────────

/// Error reported by [`Cx::check`] once a context has been aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CxError {
    /// The context was cancelled without a reason.
    Cancelled,
    /// The context was aborted with a caller-supplied reason.
    Aborted { reason: String },
}

impl CxError {
    /// The abort reason, or `"cancelled"`.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Cancelled => CANCELLED,
            Self::Aborted { reason } => reason,
        }
    }
}

impl std::fmt::Display for CxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context cancelled"),
            Self::Aborted { reason } => write!(f, "context aborted: {reason}"),
        }
    }
}

impl std::error::Error for CxError {}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_cx_is_live() {
        let (cx, _ctrl) = Cx::background();
        assert!(!cx.is_cancelled());
        assert!(cx.reason().is_none());
        assert!(cx.check().is_ok());
    }

    #[test]
    fn abort_propagates_reason() {
        let (cx, ctrl) = Cx::background();
        assert!(ctrl.abort("superseded"));
        assert!(cx.is_cancelled());
        assert_eq!(cx.reason().as_deref(), Some("superseded"));
        assert_eq!(
            cx.check(),
            Err(CxError::Aborted {
                reason: "superseded".into()
            })
        );
    }

    #[test]
    fn cancel_without_reason() {
        let (cx, ctrl) = Cx::background();
        ctrl.cancel();
        assert_eq!(cx.check(), Err(CxError::Cancelled));
    }

    #[test]
    fn first_reason_wins() {
        let (cx, ctrl) = Cx::background();
        assert!(ctrl.abort("first"));
        assert!(!ctrl.abort("second"));
        assert_eq!(cx.reason().as_deref(), Some("first"));
    }

    #[test]
    fn clone_shares_cancellation() {
        let (cx, ctrl) = Cx::background();
        let cx2 = cx.clone();
        ctrl.cancel();
        assert!(cx.is_cancelled());
        assert!(cx2.is_cancelled());
    }

    #[test]
    fn child_inherits_parent_reason() {
        let (parent, parent_ctrl) = Cx::background();
        let (child, _child_ctrl) = parent.child();
        assert!(!child.is_cancelled());
        parent_ctrl.abort("model cleared");
        assert_eq!(child.reason().as_deref(), Some("model cleared"));
    }

    #[test]
    fn child_abort_leaves_parent_live() {
        let (parent, _) = Cx::background();
        let (child, child_ctrl) = parent.child();
        child_ctrl.abort("local");
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn nearest_aborted_ancestor_supplies_reason() {
        let (root, root_ctrl) = Cx::background();
        let (mid, mid_ctrl) = root.child();
        let (leaf, _) = mid.child();
        mid_ctrl.abort("mid");
        root_ctrl.abort("root");
        assert_eq!(leaf.reason().as_deref(), Some("mid"));
    }

    #[test]
    fn controller_hands_out_cx() {
        let (cx, ctrl) = Cx::background();
        assert_eq!(ctrl.cx().id(), cx.id());
        assert!(!ctrl.is_cancelled());
    }

    #[test]
    fn cx_id_is_unique() {
        let (cx1, _) = Cx::background();
        let (cx2, _) = Cx::background();
        assert_ne!(cx1.id(), cx2.id());
    }

    #[test]
    fn cx_error_display() {
        assert_eq!(CxError::Cancelled.to_string(), "context cancelled");
        let err = CxError::Aborted {
            reason: "gone".into(),
        };
        assert_eq!(err.to_string(), "context aborted: gone");
        assert_eq!(err.reason(), "gone");
        assert_eq!(CxError::Cancelled.reason(), "cancelled");
    }

    #[test]
    fn abort_counter_increments_once() {
        let before = cx_aborts_total();
        let (_cx, ctrl) = Cx::background();
        ctrl.abort("x");
        assert!(cx_aborts_total() > before);
        assert!(!ctrl.abort("y"));
    }
}
