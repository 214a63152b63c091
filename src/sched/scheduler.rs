//! The cycle loop and the state it owns.

use std::cell::{Cell, RefCell};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_deque as deque;

use super::context::{ExecutionContext, Priority};
use super::errors::{Error, Result};
use super::job::{Job, JobQueue};
use super::monitor::{self, Fault, Monitor};
use super::unwind;
use crate::params::Params;
use crate::utils::time::Time;
use crate::wheel::{AlarmRef, Wheel};

/// Work deposited by a foreign thread.
pub(crate) type ExternalJob = Box<dyn FnOnce() + Send>;

/// A due timing-wheel entry, turned into a queued job when it fires.
pub(crate) struct AlarmTask {
    pub context: ExecutionContext,
    pub run: Box<dyn FnOnce()>,
}

/// The thread-safe inbox foreign threads deposit work into. This is the
/// only cross-thread surface of the kernel; everything else is owned by
/// the scheduler thread.
pub(crate) struct Inbox {
    injector: Mutex<deque::Worker<ExternalJob>>,
    stealer: deque::Stealer<ExternalJob>,
    signal: Signal,
}

impl Inbox {
    fn new() -> Inbox {
        let (worker, stealer) = deque::fifo();
        Inbox {
            injector: Mutex::new(worker),
            stealer,
            signal: Signal(Mutex::new(false), Condvar::new()),
        }
    }

    fn push(&self, job: ExternalJob) {
        {
            let injector = self.injector.lock().unwrap();
            injector.push(job);
        }
        self.signal.notify();
    }

    fn steal(&self) -> Option<ExternalJob> {
        loop {
            match self.stealer.steal() {
                deque::Steal::Data(job) => return Some(job),
                deque::Steal::Empty => return None,
                deque::Steal::Retry => {}
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.stealer.is_empty()
    }
}

struct Signal(Mutex<bool>, Condvar);

impl Signal {
    fn notify(&self) {
        let mut woken = self.0.lock().unwrap();
        *woken = true;
        self.1.notify_all();
    }

    /// Blocks until a notification arrives or `timeout` elapses. Consumes
    /// a pending notification, so a wakeup that raced ahead of the wait is
    /// not lost.
    fn wait_timeout(&self, timeout: Option<Duration>) {
        let mut woken = self.0.lock().unwrap();
        if *woken {
            *woken = false;
            return;
        }

        match timeout {
            Some(timeout) => {
                let (mut woken, _) = self.1.wait_timeout(woken, timeout).unwrap();
                *woken = false;
            }
            None => {
                while !*woken {
                    woken = self.1.wait(woken).unwrap();
                }
                *woken = false;
            }
        }
    }
}

/// A cloneable, `Send` handle foreign threads use to hand work to the
/// scheduler. Jobs land at the end of the normal queue on the next cycle.
#[derive(Clone)]
pub struct ExternalHandle {
    inbox: Arc<Inbox>,
}

impl ExternalHandle {
    pub fn enqueue_external_job<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inbox.push(Box::new(f));
    }

    /// Wakes a driver blocked in `park`, without enqueueing anything.
    pub fn wakeup(&self) {
        self.inbox.signal.notify();
    }
}

pub struct Scheduler {
    queues: RefCell<JobQueue>,
    wheel: RefCell<Wheel<AlarmTask>>,
    main_context: ExecutionContext,
    current: RefCell<ExecutionContext>,
    now: Cell<Time>,
    cycle_in_progress: Cell<bool>,
    cycle_count: Cell<u64>,
    num_jobs_run: Cell<u64>,
    max_jobs_per_priority: Cell<usize>,
    record_backtraces: bool,
    check_invariants: bool,
    detect_foreign_thread: bool,
    owner: thread::ThreadId,
    fatal: Cell<bool>,
    uncaught: RefCell<Option<Fault>>,
    uncaught_hook: RefCell<Option<Box<dyn Fn(&Fault)>>>,
    time_source: Box<dyn Fn() -> Time>,
    inbox: Arc<Inbox>,
}

impl Scheduler {
    pub(crate) fn new(params: &Params, time_source: Box<dyn Fn() -> Time>) -> Scheduler {
        let main_monitor = Monitor::root();
        let main_context = ExecutionContext::main(main_monitor);
        let now = time_source();

        Scheduler {
            queues: RefCell::new(JobQueue::new()),
            wheel: RefCell::new(Wheel::new(&params.timing_wheel)),
            current: RefCell::new(main_context.clone()),
            main_context,
            now: Cell::new(now),
            cycle_in_progress: Cell::new(false),
            cycle_count: Cell::new(0),
            num_jobs_run: Cell::new(0),
            max_jobs_per_priority: Cell::new(params.max_num_jobs_per_priority_per_cycle),
            record_backtraces: params.record_backtraces,
            check_invariants: params.check_invariants,
            detect_foreign_thread: params.detect_invalid_access_from_thread,
            owner: thread::current().id(),
            fatal: Cell::new(false),
            uncaught: RefCell::new(None),
            uncaught_hook: RefCell::new(None),
            time_source,
            inbox: Arc::new(Inbox::new()),
        }
    }

    /// Runs one cycle: snapshot time, fire due alarms, splice the
    /// external inbox, then drain each priority band up to the fairness
    /// cap. Jobs enqueued while a band drains run within the same cycle,
    /// cap permitting.
    pub fn run_cycle(&self) -> Result<()> {
        self.check_thread_access("run_cycle");

        if self.cycle_in_progress.get() {
            return Err(Error::CycleInProgress);
        }
        self.cycle_in_progress.set(true);

        if self.fatal.get() {
            warn!("running a scheduler cycle after an uncaught error was reported");
        }

        // Time is snapshotted once; jobs in this cycle all observe the
        // same instant.
        let now = (self.time_source)().max(self.now.get());
        self.now.set(now);

        let mut fired = Vec::new();
        self.wheel.borrow_mut().advance_to(now, &mut fired);
        for task in fired {
            self.enqueue(task.context, task.run);
        }

        while let Some(run) = self.inbox.steal() {
            self.enqueue(self.main_context.clone(), Box::new(run));
        }

        let cap = self.max_jobs_per_priority.get();
        self.drain(Priority::Normal, cap);
        self.drain(Priority::Low, cap);

        if self.check_invariants {
            self.queues.borrow().check_invariants();
            self.wheel.borrow().check_invariants();
        }

        self.cycle_count.set(self.cycle_count.get() + 1);
        self.cycle_in_progress.set(false);
        Ok(())
    }

    fn drain(&self, priority: Priority, cap: usize) {
        let mut ran = 0;
        while ran < cap {
            let job = self.queues.borrow_mut().pop(priority);
            match job {
                Some(job) => {
                    self.run_job(job);
                    ran += 1;
                }
                None => break,
            }
        }
        self.num_jobs_run.set(self.num_jobs_run.get() + ran as u64);
    }

    fn run_job(&self, job: Job) {
        let previous = self.swap_context(job.context.clone());
        let outcome = unwind::trap(job.run);
        self.swap_context(previous);

        if let Err(caught) = outcome {
            let monitor = job.context.monitor().clone();
            let fault = Fault::from_caught(caught, monitor.name());
            monitor::send_error(&monitor, fault);
        }
    }

    pub(crate) fn enqueue(&self, context: ExecutionContext, run: Box<dyn FnOnce()>) {
        self.queues.borrow_mut().push(context, run);
    }

    pub(crate) fn swap_context(&self, context: ExecutionContext) -> ExecutionContext {
        self.current.replace(context)
    }

    pub(crate) fn current_context(&self) -> ExecutionContext {
        self.current.borrow().clone()
    }

    // Alarm plumbing for the clock layer.

    pub(crate) fn add_alarm(
        &self,
        at: Time,
        context: ExecutionContext,
        run: Box<dyn FnOnce()>,
    ) -> crate::wheel::Result<AlarmRef> {
        self.wheel.borrow_mut().add(at, AlarmTask { context, run })
    }

    pub(crate) fn remove_alarm(&self, alarm: AlarmRef) -> Option<AlarmTask> {
        self.wheel.borrow_mut().remove(alarm)
    }

    pub(crate) fn alarm_is_pending(&self, alarm: AlarmRef) -> bool {
        self.wheel.borrow().is_pending(alarm)
    }

    pub(crate) fn wheel_horizon(&self) -> Time {
        self.wheel.borrow().max_allowed_alarm_time()
    }

    /// The instant the current (or most recent) cycle snapshotted.
    #[inline]
    pub fn cycle_start_time(&self) -> Time {
        self.now.get()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.cycle_in_progress.get()
    }

    #[inline]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.get()
    }

    #[inline]
    pub fn num_jobs_run(&self) -> u64 {
        self.num_jobs_run.get()
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.fatal.get()
    }

    pub fn uncaught_error(&self) -> Option<Fault> {
        self.uncaught.borrow().clone()
    }

    pub(crate) fn recording_backtraces(&self) -> bool {
        self.record_backtraces
    }

    pub fn set_max_num_jobs_per_priority_per_cycle(&self, max: usize) {
        assert!(max >= 1, "per-cycle job cap must be at least 1");
        self.max_jobs_per_priority.set(max);
    }

    pub fn install_uncaught_handler<F>(&self, hook: F)
    where
        F: Fn(&Fault) + 'static,
    {
        *self.uncaught_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Called when a fault has walked off the top of the monitor tree.
    /// The scheduler is marked fatal and the installed hook (or the
    /// default, which terminates the process) takes over.
    pub(crate) fn report_uncaught(&self, fault: Fault) {
        self.fatal.set(true);
        if self.uncaught.borrow().is_none() {
            *self.uncaught.borrow_mut() = Some(fault.clone());
        }

        let hook = self.uncaught_hook.borrow();
        match *hook {
            Some(ref hook) => hook(&fault),
            None => {
                error!("unhandled error reached the main monitor: {}", fault);
                eprintln!("unhandled error reached the main monitor: {}", fault);
                ::std::process::abort();
            }
        }
    }

    pub fn external_handle(&self) -> ExternalHandle {
        ExternalHandle {
            inbox: self.inbox.clone(),
        }
    }

    pub(crate) fn inbox_is_empty(&self) -> bool {
        self.inbox.is_empty()
    }

    pub(crate) fn queues_are_empty(&self) -> bool {
        self.queues.borrow().is_empty()
    }

    pub(crate) fn wheel_is_empty(&self) -> bool {
        self.wheel.borrow().is_empty()
    }

    /// The earliest pending alarm, if any; together with external wakeups
    /// this is the wait target a blocking driver should sleep until.
    pub fn next_upcoming_event_time(&self) -> Option<Time> {
        self.wheel.borrow().min_alarm_time()
    }

    /// Blocks the scheduler thread until an external wakeup arrives or
    /// the next upcoming event is due, assuming the time oracle moves in
    /// step with real time. Drivers with their own I/O multiplexing
    /// replace this with their poll loop.
    pub fn park(&self) {
        self.check_thread_access("park");

        let timeout = self.next_upcoming_event_time().map(|target| {
            let now = (self.time_source)();
            let delta = (target - now).nanos().max(0) as u64;
            Duration::from_nanos(delta)
        });
        self.inbox.signal.wait_timeout(timeout);
    }

    fn check_thread_access(&self, operation: &str) {
        if self.detect_foreign_thread && thread::current().id() != self.owner {
            panic!(
                "{} called from a foreign thread; only the setup thread may drive the scheduler",
                operation
            );
        }
    }
}
