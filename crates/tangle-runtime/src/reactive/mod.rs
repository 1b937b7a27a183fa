#![forbid(unsafe_code)]

//! Reactive cells and the scheduler that batches their side effects.
//!
//! - [`Observable`]: a shared, version-tracked value with synchronous change
//!   notification.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Computed`]: a lazily evaluated, memoized value derived from an
//!   `Observable`.
//! - [`scheduler`]: thread-local job queue with pre/post/sync flush timing,
//!   next-tick callbacks and timers.
//!
//! # Architecture
//!
//! `Observable<T>` uses `Rc<RefCell<..>>` for single-threaded shared
//! ownership. Subscribers are stored as `Weak` callbacks and cleaned up
//! lazily during notification.
//!
//! Notification is always synchronous. Coalescing happens one layer up: a
//! watcher's synchronous observer only flips flags and queues a job on the
//! scheduler; the job delivers the user callback at flush time.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per notifying mutation.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op.
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 5. `Computed::get()` never returns a stale value.

pub mod computed;
pub mod observable;
pub mod scheduler;

pub use computed::Computed;
pub use observable::{CellId, ChangeKind, Observable, Subscription};
pub use scheduler::{Flush, JobId, TimerId};
