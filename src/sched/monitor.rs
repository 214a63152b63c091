//! The supervision tree.
//!
//! Every execution context points at a monitor; when a job fails, the
//! failure is delivered to that monitor's handlers as freshly scheduled
//! jobs, or walks up the parent chain until something consumes it. An
//! error that escapes the root trips the scheduler's uncaught hook.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use super::context::ExecutionContext;
use super::unwind;
use crate::ivar::{Deferred, Ivar};

/// A shareable failure payload. Job failures are caught as panics at the
/// job boundary and carried through the monitor tree as `Fault`s; the
/// underlying error is reference-counted because several handlers may
/// observe the same failure.
#[derive(Clone)]
pub struct Fault {
    error: Rc<failure::Error>,
    raised_in: String,
}

impl Fault {
    pub(crate) fn new(error: failure::Error, raised_in: &str) -> Fault {
        Fault {
            error: Rc::new(error),
            raised_in: raised_in.to_owned(),
        }
    }

    pub(crate) fn from_caught(caught: unwind::Caught, raised_in: &str) -> Fault {
        Fault::new(caught.into_error(), raised_in)
    }

    /// Unwraps the monitor bookkeeping, exposing the original error.
    #[inline]
    pub fn error(&self) -> &failure::Error {
        &self.error
    }

    /// The name of the monitor the failure was first delivered to.
    #[inline]
    pub fn raised_in(&self) -> &str {
        &self.raised_in
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (in monitor '{}')", self.error, self.raised_in)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Fault({:?} in '{}')", self.error, self.raised_in)
    }
}

impl From<failure::Error> for Fault {
    fn from(error: failure::Error) -> Fault {
        Fault::new(error, "")
    }
}

struct ErrorHandler {
    context: ExecutionContext,
    run: Rc<dyn Fn(Fault)>,
}

struct Inner {
    name: String,
    parent: Option<Monitor>,
    detached: Cell<bool>,
    has_seen_error: Cell<bool>,
    handlers: RefCell<SmallVec<[ErrorHandler; 1]>>,
}

/// A node of the supervision tree. Cheap to clone; clones share identity.
#[derive(Clone)]
pub struct Monitor {
    inner: Rc<Inner>,
}

impl Monitor {
    /// Creates a monitor parented at the current context's monitor.
    pub fn create(name: &str) -> Monitor {
        Monitor::with_parent(name, Some(Monitor::current()))
    }

    /// The root of the tree; errors escaping it are uncaught.
    pub(crate) fn root() -> Monitor {
        Monitor::with_parent("main", None)
    }

    fn with_parent(name: &str, parent: Option<Monitor>) -> Monitor {
        Monitor {
            inner: Rc::new(Inner {
                name: name.to_owned(),
                parent,
                detached: Cell::new(false),
                has_seen_error: Cell::new(false),
                handlers: RefCell::new(SmallVec::new()),
            }),
        }
    }

    /// The monitor of the current execution context.
    pub fn current() -> Monitor {
        super::current_context().monitor().clone()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    pub fn parent(&self) -> Option<&Monitor> {
        self.inner.parent.as_ref()
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        self.inner.detached.get()
    }

    #[inline]
    pub fn has_seen_error(&self) -> bool {
        self.inner.has_seen_error.get()
    }

    /// Identity comparison; the tree holds no two equal monitors.
    #[inline]
    pub fn same(&self, other: &Monitor) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stops errors from being forwarded to the parent. Errors delivered
    /// afterwards reach only handlers attached to this monitor; with no
    /// handlers attached they fall through to the uncaught hook.
    pub fn detach(&self) {
        self.inner.detached.set(true);
    }

    /// Attaches `f` to be run (as a scheduled job) for every error
    /// delivered to this monitor. The execution context is captured now.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(Fault) + 'static,
    {
        self.inner.handlers.borrow_mut().push(ErrorHandler {
            context: super::current_context(),
            run: Rc::new(f),
        });
    }
}

/// Delivers `fault` to `monitor`: its handlers are enqueued as jobs, or
/// the fault climbs to the parent when there are none. Faults that escape
/// the root (or a detached handler-less monitor) go to the uncaught hook.
pub fn send_error(monitor: &Monitor, fault: Fault) {
    let mut cursor = monitor.clone();
    loop {
        cursor.inner.has_seen_error.set(true);

        let handlers = cursor.inner.handlers.borrow();
        if !handlers.is_empty() {
            for handler in handlers.iter() {
                let run = handler.run.clone();
                let fault = fault.clone();
                super::enqueue_job(handler.context.clone(), Box::new(move || run(fault)));
            }
            return;
        }
        drop(handlers);

        if cursor.is_detached() {
            break;
        }
        match cursor.parent() {
            Some(parent) => {
                let parent = parent.clone();
                cursor = parent;
            }
            None => break,
        }
    }

    super::ctx().report_uncaught(fault);
}

/// Runs `f` inside a fresh detached monitor and hands back a deferred
/// that resolves to `Ok` with the value of the deferred `f` returns, or
/// `Err` with the first failure raised under that monitor. Failures after
/// the first are logged through the rest-error sink.
pub fn try_with<T, F>(f: F) -> Deferred<Result<T, Fault>>
where
    T: Clone + 'static,
    F: FnOnce() -> Deferred<T>,
{
    let monitor = Monitor::create("try_with");
    monitor.detach();

    let result: Ivar<Result<T, Fault>> = Ivar::new();

    let first = result.clone();
    let name = monitor.name().to_owned();
    monitor.on_error(move |fault| {
        if !first.fill_if_empty(Err(fault.clone())) {
            warn!(
                "monitor '{}' saw an error after its region was decided: {}",
                name, fault
            );
        }
    });

    let context = super::current_context()
        .with_monitor(monitor.clone())
        .with_call_site("try_with");
    super::within_context_caught(&context, f, |outcome| match outcome {
        Ok(deferred) => {
            let done = result.clone();
            deferred.upon(move |v| {
                done.fill_if_empty(Ok(v));
            });
        }
        Err(caught) => {
            send_error(&monitor, Fault::from_caught(caught, monitor.name()));
        }
    });

    result.read()
}

/// Unwraps the monitor bookkeeping from a propagated failure, exposing
/// the error the job originally raised.
pub fn extract_exn(fault: &Fault) -> &failure::Error {
    fault.error()
}

/// Runs `f` inside a fresh detached monitor, streaming every failure
/// raised under it to `handler` instead of containing only the first.
/// Hands back the deferred `f` returns, or a never-determined deferred
/// when `f` itself fails synchronously.
pub fn handle_errors<T, F, H>(f: F, handler: H) -> Deferred<T>
where
    T: Clone + 'static,
    F: FnOnce() -> Deferred<T>,
    H: Fn(Fault) + 'static,
{
    let monitor = Monitor::create("handle_errors");
    monitor.detach();
    monitor.on_error(handler);

    let context = super::current_context().with_monitor(monitor.clone());
    let mut returned = None;
    super::within_context_caught(&context, f, |outcome| match outcome {
        Ok(deferred) => returned = Some(deferred),
        Err(caught) => {
            send_error(&monitor, Fault::from_caught(caught, monitor.name()));
        }
    });

    returned.unwrap_or_else(Deferred::never)
}
