#![forbid(unsafe_code)]

//! Thread-local job scheduler: batched flushes, next-tick callbacks, timers.
//!
//! Observables notify synchronously. Anything that wants coalesced delivery
//! (the watchers in [`crate::watch`]) queues a job here instead and runs when
//! the host calls [`flush`], typically once per UI frame.
//!
//! # Flush order
//!
//! 1. Queued [`Flush::Pre`] jobs, in queue order.
//! 2. Queued [`Flush::Post`] jobs; a `Pre` job queued meanwhile runs first.
//! 3. [`next_tick`] callbacks, once both queues are empty. Jobs they queue
//!    run in the same flush.
//!
//! # Invariants
//!
//! 1. A [`JobId`] is queued at most once at any time; re-queueing a queued
//!    job is a no-op (this is what coalesces bursts of writes).
//! 2. [`Flush::Sync`] jobs never touch the queue; they run inside
//!    [`schedule`].
//! 3. [`flush`] is not re-entrant: a nested call returns immediately and the
//!    outer flush picks up the work.
//! 4. A job that runs more than `max_flush_passes` times in one flush is
//!    dropped with an error event.
//! 5. No scheduler borrow is held while user code runs.
//!
//! # Timers
//!
//! [`set_timeout`] registers a callback against the thread's [`Clock`].
//! With a lab clock ([`use_lab_clock`]), [`advance`] steps time to each due
//! deadline in order, running the timer and a flush after each one.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use tangle_core::clock::{Clock, LabClock};
use web_time::{Duration, Instant};

use crate::config::RuntimeConfig;

/// Delivery timing for a watcher callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Flush {
    /// Batched, before post jobs.
    #[default]
    Pre,
    /// Batched, after every pre job.
    Post,
    /// Immediately, inside the write that caused it.
    Sync,
}

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Identity used to coalesce queued jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Handle for a pending [`set_timeout`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// A queued unit of work.
pub type Job = Rc<dyn Fn()>;

type TimerKey = (Instant, u64);

struct SchedulerState {
    pre: VecDeque<(JobId, Job)>,
    post: VecDeque<(JobId, Job)>,
    queued: AHashSet<JobId>,
    ticks: Vec<Box<dyn FnOnce()>>,
    timers: BTreeMap<TimerKey, Box<dyn FnOnce()>>,
    timer_keys: AHashMap<TimerId, TimerKey>,
    next_timer: u64,
    clock: Clock,
    config: RuntimeConfig,
    flushing: bool,
    headless_depth: u32,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            pre: VecDeque::new(),
            post: VecDeque::new(),
            queued: AHashSet::new(),
            ticks: Vec::new(),
            timers: BTreeMap::new(),
            timer_keys: AHashMap::new(),
            next_timer: 1,
            clock: Clock::Real,
            config: RuntimeConfig::default(),
            flushing: false,
            headless_depth: 0,
        }
    }

    fn pop_job(&mut self) -> Option<(JobId, Job)> {
        let next = self.pre.pop_front().or_else(|| self.post.pop_front());
        if let Some((id, _)) = &next {
            self.queued.remove(id);
        }
        next
    }

    fn pop_timer_due_by(&mut self, deadline: Instant) -> Option<(Instant, Box<dyn FnOnce()>)> {
        let (&key, _) = self.timers.iter().next()?;
        if key.0 > deadline {
            return None;
        }
        self.timer_keys.remove(&TimerId(key.1));
        self.timers.remove(&key).map(|callback| (key.0, callback))
    }
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::new());
}

fn with_state<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    SCHEDULER.with(|state| f(&mut state.borrow_mut()))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Queue `job` for the next flush, or run it now for [`Flush::Sync`].
pub fn schedule(id: JobId, flush: Flush, job: Job) {
    if flush == Flush::Sync {
        job();
        return;
    }
    let rejected = with_state(|s| {
        if !s.queued.insert(id) {
            return Some(job);
        }
        match flush {
            Flush::Post => s.post.push_back((id, job)),
            _ => s.pre.push_back((id, job)),
        }
        None
    });
    drop(rejected);
}

/// Whether `id` is waiting in the queue.
#[must_use]
pub fn is_queued(id: JobId) -> bool {
    with_state(|s| s.queued.contains(&id))
}

/// Number of queued jobs.
#[must_use]
pub fn pending_jobs() -> usize {
    with_state(|s| s.pre.len() + s.post.len())
}

/// Run a callback after the current (or next) flush has drained its jobs.
pub fn next_tick(callback: impl FnOnce() + 'static) {
    with_state(|s| s.ticks.push(Box::new(callback)));
}

/// Whether a flush is running on this thread.
#[must_use]
pub fn is_flushing() -> bool {
    with_state(|s| s.flushing)
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let _ = SCHEDULER.try_with(|state| state.borrow_mut().flushing = false);
    }
}

/// Drain the job queues and next-tick callbacks. Returns the number of jobs
/// that ran.
pub fn flush() -> usize {
    let entered = with_state(|s| !std::mem::replace(&mut s.flushing, true));
    if !entered {
        return 0;
    }
    let _guard = FlushGuard;
    let span = tracing::debug_span!("scheduler.flush");
    let _enter = span.enter();

    let limit = with_state(|s| s.config.max_flush_passes);
    let mut runs: AHashMap<JobId, usize> = AHashMap::new();
    let mut executed = 0usize;
    loop {
        let Some((id, job)) = with_state(SchedulerState::pop_job) else {
            let ticks = with_state(|s| std::mem::take(&mut s.ticks));
            if ticks.is_empty() {
                break;
            }
            for tick in ticks {
                tick();
            }
            continue;
        };
        let count = runs.entry(id).or_insert(0);
        *count += 1;
        if *count > limit {
            tracing::error!(
                job = id.raw(),
                limit,
                "job re-queued past the flush limit; dropping it (update loop?)"
            );
            continue;
        }
        job();
        executed += 1;
    }
    tracing::trace!(executed, "flush complete");
    executed
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// Current time on this thread's clock.
#[must_use]
pub fn now() -> Instant {
    with_state(|s| s.clock.now())
}

/// Install a fresh lab clock on this thread and return it.
pub fn use_lab_clock() -> LabClock {
    let clock = LabClock::new();
    with_state(|s| s.clock = Clock::Lab(clock.clone()));
    clock
}

/// Go back to wall-clock time.
pub fn use_real_clock() {
    with_state(|s| s.clock = Clock::Real);
}

/// Run `callback` once `delay` has elapsed.
pub fn set_timeout(delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
    with_state(|s| {
        let seq = s.next_timer;
        s.next_timer += 1;
        let key = (s.clock.now() + delay, seq);
        s.timers.insert(key, Box::new(callback));
        s.timer_keys.insert(TimerId(seq), key);
        TimerId(seq)
    })
}

/// Cancel a pending timer. Returns `false` if it already fired or was
/// cleared.
pub fn clear_timeout(id: TimerId) -> bool {
    let removed = with_state(|s| {
        let key = s.timer_keys.remove(&id)?;
        s.timers.remove(&key)
    });
    removed.is_some()
}

/// Number of timers waiting to fire.
#[must_use]
pub fn pending_timers() -> usize {
    with_state(|s| s.timers.len())
}

/// Fire every timer whose deadline has passed, flushing after each.
pub fn run_due_timers() -> usize {
    let mut fired = 0;
    loop {
        let due = with_state(|s| {
            let now = s.clock.now();
            s.pop_timer_due_by(now)
        });
        let Some((_, callback)) = due else {
            break;
        };
        callback();
        fired += 1;
        flush();
    }
    fired
}

/// Advance the lab clock by `delta`, firing timers at their deadlines.
///
/// On a real clock this only runs timers that are already due.
pub fn advance(delta: Duration) -> usize {
    let Some(clock) = with_state(|s| s.clock.lab().cloned()) else {
        tracing::warn!("advance() called without a lab clock; running due timers only");
        return run_due_timers();
    };
    let target = clock.now() + delta;
    let mut fired = 0;
    loop {
        let Some((at, callback)) = with_state(|s| s.pop_timer_due_by(target)) else {
            break;
        };
        let now = clock.now();
        if at > now {
            clock.advance(at - now);
        }
        callback();
        fired += 1;
        flush();
    }
    let now = clock.now();
    if target > now {
        clock.advance(target - now);
    }
    fired
}

// ---------------------------------------------------------------------------
// Configuration and headless mode
// ---------------------------------------------------------------------------

/// Install `config` for this thread.
pub fn configure(config: RuntimeConfig) {
    tracing::debug!(?config, "scheduler configured");
    with_state(|s| s.config = config);
}

/// This thread's configuration.
#[must_use]
pub fn config() -> RuntimeConfig {
    with_state(|s| s.config.clone())
}

/// Whether watchers should evaluate without subscribing.
#[must_use]
pub fn is_headless() -> bool {
    with_state(|s| s.headless_depth > 0 || s.config.headless)
}

/// RAII guard for headless evaluation; see [`enter_headless`].
#[derive(Debug)]
pub struct HeadlessGuard {
    _not_send: PhantomData<Rc<()>>,
}

/// Evaluate without a scheduling context until the guard drops. Nests.
#[must_use = "headless mode ends when the guard is dropped"]
pub fn enter_headless() -> HeadlessGuard {
    with_state(|s| s.headless_depth += 1);
    HeadlessGuard {
        _not_send: PhantomData,
    }
}

impl Drop for HeadlessGuard {
    fn drop(&mut self) {
        let _ = SCHEDULER
            .try_with(|state| {
                let mut state = state.borrow_mut();
                state.headless_depth = state.headless_depth.saturating_sub(1);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};
    use tracing::Subscriber;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Job) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let make = move |name: &'static str| -> Job {
            let l = Rc::clone(&l);
            Rc::new(move || l.borrow_mut().push(name))
        };
        (log, make)
    }

    #[test]
    fn pre_jobs_run_before_post_jobs() {
        let (log, job) = recorder();
        schedule(JobId::next(), Flush::Post, job("post"));
        schedule(JobId::next(), Flush::Pre, job("pre"));
        assert_eq!(pending_jobs(), 2);
        assert_eq!(flush(), 2);
        assert_eq!(*log.borrow(), vec!["pre", "post"]);
    }

    #[test]
    fn queued_job_is_coalesced() {
        let (log, job) = recorder();
        let id = JobId::next();
        schedule(id, Flush::Pre, job("a"));
        schedule(id, Flush::Pre, job("a"));
        assert!(is_queued(id));
        flush();
        assert_eq!(log.borrow().len(), 1);
        assert!(!is_queued(id));
    }

    #[test]
    fn sync_jobs_bypass_the_queue() {
        let (log, job) = recorder();
        schedule(JobId::next(), Flush::Sync, job("now"));
        assert_eq!(*log.borrow(), vec!["now"]);
        assert_eq!(pending_jobs(), 0);
    }

    #[test]
    fn next_tick_runs_after_jobs() {
        let (log, job) = recorder();
        let l = Rc::clone(&log);
        next_tick(move || l.borrow_mut().push("tick"));
        schedule(JobId::next(), Flush::Post, job("job"));
        flush();
        assert_eq!(*log.borrow(), vec!["job", "tick"]);
    }

    #[test]
    fn nested_flush_is_noop() {
        let inner_ran = Rc::new(Cell::new(usize::MAX));
        let r = Rc::clone(&inner_ran);
        schedule(
            JobId::next(),
            Flush::Pre,
            Rc::new(move || r.set(flush())),
        );
        flush();
        assert_eq!(inner_ran.get(), 0);
        assert!(!is_flushing());
    }

    #[test]
    fn jobs_queued_during_flush_run_in_same_flush() {
        let (log, job) = recorder();
        let follow_up = job("second");
        schedule(
            JobId::next(),
            Flush::Post,
            Rc::new(move || schedule(JobId::next(), Flush::Pre, Rc::clone(&follow_up))),
        );
        assert_eq!(flush(), 2);
        assert_eq!(*log.borrow(), vec!["second"]);
    }

    #[test]
    fn runaway_job_is_dropped_at_limit() {
        configure(RuntimeConfig {
            max_flush_passes: 3,
            ..RuntimeConfig::default()
        });
        let runs = Rc::new(Cell::new(0));
        let id = JobId::next();
        let job: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&job);
        let r = Rc::clone(&runs);
        *job.borrow_mut() = Some(Rc::new(move || {
            r.set(r.get() + 1);
            if let Some(me) = slot.borrow().clone() {
                schedule(id, Flush::Pre, me);
            }
        }));
        let first = job.borrow().clone().expect("job installed");
        schedule(id, Flush::Pre, first);
        flush();
        assert_eq!(runs.get(), 3);
        assert_eq!(pending_jobs(), 0);
        job.borrow_mut().take();
    }

    #[test]
    fn timers_fire_in_deadline_order_on_lab_clock() {
        let clock = use_lab_clock();
        let (log, job) = recorder();
        let late = job("late");
        let early = job("early");
        set_timeout(Duration::from_millis(30), move || late());
        set_timeout(Duration::from_millis(10), move || early());
        assert_eq!(pending_timers(), 2);

        assert_eq!(advance(Duration::from_millis(5)), 0);
        assert_eq!(advance(Duration::from_millis(30)), 2);
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(clock.elapsed(), Duration::from_millis(35));
    }

    #[test]
    fn timer_scheduled_from_timer_uses_its_deadline() {
        let clock = use_lab_clock();
        let fired_at = Rc::new(Cell::new(Duration::ZERO));
        let f = Rc::clone(&fired_at);
        let c = clock.clone();
        set_timeout(Duration::from_millis(10), move || {
            set_timeout(Duration::from_millis(10), move || f.set(c.elapsed()));
        });
        assert_eq!(advance(Duration::from_millis(100)), 2);
        assert_eq!(fired_at.get(), Duration::from_millis(20));
    }

    #[test]
    fn cleared_timer_never_fires() {
        use_lab_clock();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        let id = set_timeout(Duration::from_millis(1), move || f.set(true));
        assert!(clear_timeout(id));
        assert!(!clear_timeout(id));
        advance(Duration::from_millis(10));
        assert!(!fired.get());
    }

    #[test]
    fn timer_callbacks_are_followed_by_a_flush() {
        use_lab_clock();
        let (log, job) = recorder();
        let queued = job("queued");
        set_timeout(Duration::from_millis(1), move || {
            schedule(JobId::next(), Flush::Post, Rc::clone(&queued));
        });
        advance(Duration::from_millis(1));
        assert_eq!(*log.borrow(), vec!["queued"]);
    }

    #[test]
    fn headless_guard_nests() {
        assert!(!is_headless());
        let outer = enter_headless();
        let inner = enter_headless();
        drop(inner);
        assert!(is_headless());
        drop(outer);
        assert!(!is_headless());
    }

    #[test]
    fn headless_from_config() {
        configure(RuntimeConfig {
            headless: true,
            ..RuntimeConfig::default()
        });
        assert!(is_headless());
        assert!(config().headless);
    }

    // ---- tracing ----

    #[derive(Default)]
    struct FlushTraceState {
        saw_flush_span: bool,
        saw_limit_error: bool,
    }

    struct FlushTraceCapture {
        state: Arc<Mutex<FlushTraceState>>,
    }

    impl<S> Layer<S> for FlushTraceCapture
    where
        S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
    {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::Id,
            _ctx: Context<'_, S>,
        ) {
            if attrs.metadata().name() == "scheduler.flush" {
                self.state.lock().expect("flush trace lock").saw_flush_span = true;
            }
        }

        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.state.lock().expect("flush trace lock").saw_limit_error = true;
            }
        }
    }

    #[test]
    fn flush_emits_span_and_limit_error() {
        let state = Arc::new(Mutex::new(FlushTraceState::default()));
        let subscriber = tracing_subscriber::registry().with(FlushTraceCapture {
            state: Arc::clone(&state),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        configure(RuntimeConfig {
            max_flush_passes: 1,
            ..RuntimeConfig::default()
        });
        let id = JobId::next();
        let requeue: Job = Rc::new(move || schedule(id, Flush::Pre, Rc::new(|| {})));
        schedule(id, Flush::Pre, requeue);
        flush();

        let snapshot = state.lock().expect("flush trace lock");
        assert!(snapshot.saw_flush_span, "expected scheduler.flush span");
        assert!(snapshot.saw_limit_error, "expected flush limit error");
    }
}
