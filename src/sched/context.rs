//! The execution context attached to every job.

use std::any::Any;
use std::rc::Rc;

use smallvec::SmallVec;

use super::monitor::Monitor;
use crate::utils::hash::FastHashMap;

/// The two scheduling bands. Within a band jobs run in strict FIFO order;
/// a low-priority job runs only once the normal band has been drained for
/// the cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Priority {
    Normal,
    Low,
}

/// An immutable bundle of (monitor, priority, local data) that travels
/// with every job. Deriving a changed context copies the bundle; the
/// original is never mutated, so contexts can be shared freely between
/// jobs and handlers.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Rc<Inner>,
}

struct Inner {
    monitor: Monitor,
    priority: Priority,
    backtrace_history: SmallVec<[&'static str; 8]>,
    locals: FastHashMap<&'static str, Rc<dyn Any>>,
}

impl ExecutionContext {
    pub(crate) fn main(monitor: Monitor) -> Self {
        ExecutionContext {
            inner: Rc::new(Inner {
                monitor,
                priority: Priority::Normal,
                backtrace_history: SmallVec::new(),
                locals: FastHashMap::default(),
            }),
        }
    }

    #[inline]
    pub fn monitor(&self) -> &Monitor {
        &self.inner.monitor
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// The logical call-site history recorded for this context. Empty
    /// unless `record_backtraces` was enabled at setup.
    #[inline]
    pub fn backtrace_history(&self) -> &[&'static str] {
        &self.inner.backtrace_history
    }

    pub fn with_monitor(&self, monitor: Monitor) -> Self {
        let mut inner = self.copy();
        inner.monitor = monitor;
        ExecutionContext {
            inner: Rc::new(inner),
        }
    }

    pub fn with_priority(&self, priority: Priority) -> Self {
        let mut inner = self.copy();
        inner.priority = priority;
        ExecutionContext {
            inner: Rc::new(inner),
        }
    }

    /// Derives a context carrying `value` under `key` in its local
    /// storage.
    pub fn with_local<V: 'static>(&self, key: &'static str, value: V) -> Self {
        let mut inner = self.copy();
        inner.locals.insert(key, Rc::new(value));
        ExecutionContext {
            inner: Rc::new(inner),
        }
    }

    pub fn local<V: 'static>(&self, key: &'static str) -> Option<Rc<V>> {
        self.inner
            .locals
            .get(key)
            .and_then(|v| v.clone().downcast::<V>().ok())
    }

    /// Appends a call site to the recorded history, when recording is
    /// enabled; otherwise hands back the context unchanged.
    pub(crate) fn with_call_site(&self, site: &'static str) -> Self {
        if !super::recording_backtraces() {
            return self.clone();
        }

        let mut inner = self.copy();
        inner.backtrace_history.push(site);
        ExecutionContext {
            inner: Rc::new(inner),
        }
    }

    fn copy(&self) -> Inner {
        Inner {
            monitor: self.inner.monitor.clone(),
            priority: self.inner.priority,
            backtrace_history: self.inner.backtrace_history.clone(),
            locals: self.inner.locals.clone(),
        }
    }
}
