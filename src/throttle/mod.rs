//! Bounded concurrency over the job queue, and broadcast signaling.
//!
//! A throttle admits at most `max_concurrent_jobs` bodies at a time;
//! everything else waits in FIFO order. Each body runs inside its own
//! `try_with`, so a failing job surfaces as an `Err` on its own deferred
//! instead of tearing through the caller's monitor.

pub mod condition;
pub mod errors;

pub use self::condition::Condition;
pub use self::errors::{Error, Result};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::ivar::{Deferred, Ivar};
use crate::sched::{self, monitor, ExecutionContext, Fault};

struct Queued {
    context: ExecutionContext,
    start: Box<dyn FnOnce()>,
    abort: Box<dyn FnOnce()>,
}

struct State {
    max: usize,
    continue_on_error: bool,
    running: usize,
    dead: bool,
    queue: VecDeque<Queued>,
}

type StateRef = Rc<RefCell<State>>;

/// A bounded-concurrency executor over an ordered queue of jobs.
#[derive(Clone)]
pub struct Throttle {
    state: StateRef,
}

impl Throttle {
    /// At most `max_concurrent_jobs` bodies run at once. With
    /// `continue_on_error` off, the first failing body kills the
    /// throttle: queued jobs abort and new ones are refused.
    pub fn new(max_concurrent_jobs: usize, continue_on_error: bool) -> Throttle {
        assert!(
            max_concurrent_jobs >= 1,
            "a throttle needs at least one concurrent job"
        );
        Throttle {
            state: Rc::new(RefCell::new(State {
                max: max_concurrent_jobs,
                continue_on_error,
                running: 0,
                dead: false,
                queue: VecDeque::new(),
            })),
        }
    }

    /// A throttle of width one: a mutual-exclusion sequencer.
    pub fn sequencer(continue_on_error: bool) -> Throttle {
        Throttle::new(1, continue_on_error)
    }

    /// Queues `f`; its deferred carries the body's value, the fault that
    /// failed it, or `Aborted` when the throttle dies first. Jobs start
    /// in submission order.
    pub fn enqueue<R, F>(&self, f: F) -> Deferred<::std::result::Result<R, Fault>>
    where
        R: Clone + 'static,
        F: FnOnce() -> Deferred<R> + 'static,
    {
        let result: Ivar<::std::result::Result<R, Fault>> = Ivar::new();

        if self.state.borrow().dead {
            result
                .fill(Err(aborted()))
                .expect("fresh throttle ivar was full");
            return result.read();
        }

        let state = self.state.clone();
        let completed = result.clone();
        let start = Box::new(move || {
            let body = monitor::try_with(f);
            body.upon(move |outcome| {
                let kill = {
                    let mut st = state.borrow_mut();
                    st.running -= 1;
                    outcome.is_err() && !st.continue_on_error
                };
                completed
                    .fill(outcome)
                    .expect("throttle job ivar filled twice");
                if kill {
                    Throttle::kill_inner(&state);
                }
                Throttle::pump(&state);
            });
        });

        let refused = result.clone();
        let abort = Box::new(move || {
            refused
                .fill(Err(aborted()))
                .expect("throttle job ivar filled twice");
        });

        self.state.borrow_mut().queue.push_back(Queued {
            context: sched::current_context(),
            start,
            abort,
        });
        Throttle::pump(&self.state);

        result.read()
    }

    /// Aborts everything still queued and refuses new work. Jobs already
    /// running are left to finish.
    pub fn kill(&self) {
        Throttle::kill_inner(&self.state);
    }

    fn kill_inner(state: &StateRef) {
        let drained = {
            let mut st = state.borrow_mut();
            if st.dead {
                return;
            }
            st.dead = true;
            st.queue.drain(..).collect::<Vec<_>>()
        };
        for queued in drained {
            (queued.abort)();
        }
    }

    /// Dispatches queued jobs while capacity allows. Each dispatch is a
    /// scheduled job under the context captured at enqueue time.
    fn pump(state: &StateRef) {
        loop {
            let next = {
                let mut st = state.borrow_mut();
                if st.dead || st.running >= st.max {
                    None
                } else {
                    match st.queue.pop_front() {
                        Some(queued) => {
                            st.running += 1;
                            Some(queued)
                        }
                        None => None,
                    }
                }
            };

            match next {
                Some(queued) => sched::enqueue_job(queued.context, queued.start),
                None => break,
            }
        }
    }

    #[inline]
    pub fn max_concurrent_jobs(&self) -> usize {
        self.state.borrow().max
    }

    #[inline]
    pub fn num_jobs_running(&self) -> usize {
        self.state.borrow().running
    }

    #[inline]
    pub fn num_jobs_waiting(&self) -> usize {
        self.state.borrow().queue.len()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state.borrow().dead
    }
}

fn aborted() -> Fault {
    Fault::from(failure::Error::from(Error::Aborted))
}
