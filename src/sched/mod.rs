//! The single-threaded cooperative scheduler.
//!
//! The kernel keeps one scheduler per thread, reachable through a
//! thread-local pointer so that combinators keep their argument-free API
//! shape. `setup` installs it, `discard` tears it down; everything in
//! between happens inside `run_cycle`.
//!
//! Jobs run to completion; there is no preemption. A computation
//! "suspends" by returning and registering its continuation as a handler
//! on some deferred. Foreign threads may only deposit work through the
//! external inbox (`ExternalHandle`).

pub mod context;
pub mod errors;
pub mod monitor;

mod job;
mod scheduler;
pub(crate) mod unwind;

pub use self::context::{ExecutionContext, Priority};
pub use self::errors::{Error, Result};
pub use self::monitor::{extract_exn, handle_errors, send_error, try_with, Fault, Monitor};
pub use self::scheduler::{ExternalHandle, Scheduler};

use std::cell::Cell;
use std::ptr;
use std::time::Instant;

use crate::ivar::Deferred;
use crate::params::Params;
use crate::utils::time::Time;

// The scheduler lives on the stack of no one: it is boxed at setup and
// reachable through this thread local until discard. Using a raw pointer
// avoids a RefCell borrow on every combinator.
thread_local! {
    static CTX: Cell<*const Scheduler> = Cell::new(ptr::null());
}

pub(crate) fn ctx() -> &'static Scheduler {
    CTX.with(|ctx| {
        let ptr = ctx.get();
        assert!(
            !ptr.is_null(),
            "the task kernel has not been initialized properly; call setup first"
        );
        unsafe { &*ptr }
    })
}

/// Sets up the kernel on the current thread with the default monotonic
/// time oracle, which starts at the epoch when `setup` is called.
pub fn setup(params: Params) {
    let origin = Instant::now();
    setup_with_time_source(
        params,
        Box::new(move || {
            let elapsed = origin.elapsed();
            Time::from_nanos(elapsed.as_secs() * 1_000_000_000 + u64::from(elapsed.subsec_nanos()))
        }),
    );
}

/// Sets up the kernel with a caller-provided time oracle. The oracle must
/// be monotonic; the scheduler snapshots it once per cycle.
pub fn setup_with_time_source(params: Params, time_source: Box<dyn Fn() -> Time>) {
    CTX.with(|ctx| {
        assert!(ctx.get().is_null(), "duplicated setup of the task kernel");
        let scheduler = Box::new(Scheduler::new(&params, time_source));
        ctx.set(Box::into_raw(scheduler));
    });
}

/// Discards the kernel on the current thread. Queued jobs and pending
/// alarms are dropped.
pub fn discard() {
    CTX.with(|ctx| {
        let ptr = ctx.get();
        assert!(!ptr.is_null(), "discarding a kernel that was never set up");

        {
            let scheduler = unsafe { &*ptr };
            assert!(
                !scheduler.is_running(),
                "discarding the kernel from inside a cycle"
            );
            if !scheduler.queues_are_empty() || !scheduler.wheel_is_empty() {
                info!("kernel discarded with queued jobs or pending alarms");
            }
        }

        ctx.set(ptr::null());
        drop(unsafe { Box::from_raw(ptr as *mut Scheduler) });
    });
}

/// Checks if the kernel has been set up on the current thread.
#[inline]
pub fn valid() -> bool {
    CTX.with(|ctx| !ctx.get().is_null())
}

/// Runs one scheduler cycle. See `Scheduler::run_cycle`.
pub fn run_cycle() -> Result<()> {
    ctx().run_cycle()
}

/// Cycles the scheduler until `deferred` determines, parking between
/// cycles when the queues go idle. Meant for drivers and tests running on
/// the default time oracle; with a manual oracle, advance it and call
/// `run_cycle` directly instead.
pub fn run_cycles_until_determined<T>(deferred: &Deferred<T>) -> T
where
    T: Clone + 'static,
{
    loop {
        if let Some(v) = deferred.peek() {
            return v;
        }

        let scheduler = ctx();
        scheduler.run_cycle().expect("re-entrant driver loop");

        if scheduler.queues_are_empty() && scheduler.inbox_is_empty() {
            if let Some(v) = deferred.peek() {
                return v;
            }
            assert!(
                !scheduler.wheel_is_empty(),
                "deferred can never determine: no jobs queued and no alarms pending"
            );
            scheduler.park();
        }
    }
}

/// Enqueues `f` to run as a job under the current execution context.
pub fn spawn<F>(f: F)
where
    F: FnOnce() + 'static,
{
    let context = current_context().with_call_site("spawn");
    ctx().enqueue(context, Box::new(f));
}

/// Enqueues `f` under the current context shifted to `priority`.
pub fn spawn_with_priority<F>(priority: Priority, f: F)
where
    F: FnOnce() + 'static,
{
    let context = current_context()
        .with_priority(priority)
        .with_call_site("spawn");
    ctx().enqueue(context, Box::new(f));
}

pub(crate) fn enqueue_job(context: ExecutionContext, run: Box<dyn FnOnce()>) {
    ctx().enqueue(context, run);
}

pub fn current_context() -> ExecutionContext {
    ctx().current_context()
}

pub(crate) fn recording_backtraces() -> bool {
    valid() && ctx().recording_backtraces()
}

/// Runs `f` with the current context set to `context`, restoring the
/// previous context on all exit paths.
pub fn within_context<R>(context: &ExecutionContext, f: impl FnOnce() -> R) -> R {
    let scheduler = ctx();
    let previous = scheduler.swap_context(context.clone());
    let outcome = unwind::trap(f);
    scheduler.swap_context(previous);

    match outcome {
        Ok(v) => v,
        Err(caught) => caught.resume(),
    }
}

/// Like `within_context`, but hands the caught outcome to `k` instead of
/// resuming a panic, so callers can route failures into the monitor tree.
pub(crate) fn within_context_caught<R>(
    context: &ExecutionContext,
    f: impl FnOnce() -> R,
    k: impl FnOnce(::std::result::Result<R, unwind::Caught>),
) {
    let scheduler = ctx();
    let previous = scheduler.swap_context(context.clone());
    let outcome = unwind::trap(f);
    scheduler.swap_context(previous);
    k(outcome);
}

/// The time snapshotted at the start of the current (or latest) cycle.
#[inline]
pub fn cycle_start_time() -> Time {
    ctx().cycle_start_time()
}

/// True while a cycle is in progress.
#[inline]
pub fn is_running() -> bool {
    ctx().is_running()
}

/// The earliest pending alarm; the wait target for a blocking driver.
pub fn next_upcoming_event_time() -> Option<Time> {
    ctx().next_upcoming_event_time()
}

/// True once an error has escaped the monitor tree.
#[inline]
pub fn is_fatal() -> bool {
    ctx().is_fatal()
}

/// The first error that escaped the monitor tree, if any.
pub fn uncaught_error() -> Option<Fault> {
    ctx().uncaught_error()
}

pub fn set_max_num_jobs_per_priority_per_cycle(max: usize) {
    ctx().set_max_num_jobs_per_priority_per_cycle(max);
}

/// Replaces the default uncaught-error hook (which terminates the
/// process) with `hook`.
pub fn install_uncaught_handler<F>(hook: F)
where
    F: Fn(&Fault) + 'static,
{
    ctx().install_uncaught_handler(hook);
}

/// A `Send` handle for depositing jobs from foreign threads.
pub fn external_handle() -> ExternalHandle {
    ctx().external_handle()
}
