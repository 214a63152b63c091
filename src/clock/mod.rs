//! Timed operations, built on the timing wheel and the promise substrate.
//!
//! Everything here reduces to `Event`: a wheel entry paired with a
//! `fired` deferred. Cancellation and timeouts are composition: aborting
//! an event removes its wheel entry and fills `fired` with `Aborted`.
//! Nothing interrupts a running job.

pub mod errors;

pub use self::errors::{Error, Result};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::ivar::{self, Deferred, Ivar};
use crate::pipe;
use crate::sched::{self, monitor, Monitor};
use crate::utils::time::{Span, Time};
use crate::wheel::AlarmRef;

/// How an event left its waiting state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fired {
    Happened,
    Aborted,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Waiting,
    Happened,
    Aborted,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AbortResult {
    Ok,
    PreviouslyAborted,
    PreviouslyHappened,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RescheduleResult {
    Ok,
    /// The fire job is already on the queue; the event will happen.
    TooLateToReschedule,
    PreviouslyAborted,
    PreviouslyHappened,
}

/// The outcome of `with_timeout`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimeoutResult<T> {
    Result(T),
    Timeout,
}

struct EventInner {
    at: Cell<Time>,
    status: Cell<Status>,
    alarm: Cell<Option<AlarmRef>>,
    fired: Ivar<Fired>,
}

/// A single future-dated occurrence: fires once at its scheduled time
/// unless aborted or rescheduled first.
#[derive(Clone)]
pub struct Event {
    inner: Rc<EventInner>,
}

impl Event {
    /// Schedules an event at `at`. Times at or before the cycle snapshot
    /// fire on the next cycle; they are never invoked inline.
    pub fn at(at: Time) -> Event {
        let event = Event {
            inner: Rc::new(EventInner {
                at: Cell::new(at),
                status: Cell::new(Status::Waiting),
                alarm: Cell::new(None),
                fired: Ivar::new(),
            }),
        };
        arm(&event.inner, at);
        event
    }

    pub fn after(span: Span) -> Event {
        Event::at(sched::cycle_start_time() + span)
    }

    /// Schedules an event at `at` and runs `f` once it fires, and not if
    /// it is aborted.
    pub fn run_at<F>(at: Time, f: F) -> Event
    where
        F: FnOnce() + 'static,
    {
        let event = Event::at(at);
        event.fired().upon(move |fired| {
            if let Fired::Happened = fired {
                f();
            }
        });
        event
    }

    pub fn run_after<F>(span: Span, f: F) -> Event
    where
        F: FnOnce() + 'static,
    {
        Event::run_at(sched::cycle_start_time() + span, f)
    }

    /// Determined with `Happened` or `Aborted` once the event leaves its
    /// waiting state.
    pub fn fired(&self) -> Deferred<Fired> {
        self.inner.fired.read()
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    /// The time the event is currently scheduled for.
    #[inline]
    pub fn scheduled_at(&self) -> Time {
        self.inner.at.get()
    }

    /// Aborts a waiting event: the wheel entry is removed and `fired`
    /// determines with `Aborted`, even when the fire job was already
    /// queued but has not run.
    pub fn abort(&self) -> AbortResult {
        match self.inner.status.get() {
            Status::Happened => AbortResult::PreviouslyHappened,
            Status::Aborted => AbortResult::PreviouslyAborted,
            Status::Waiting => {
                if let Some(alarm) = self.inner.alarm.take() {
                    sched::ctx().remove_alarm(alarm);
                }
                self.inner.status.set(Status::Aborted);
                self.inner
                    .fired
                    .fill(Fired::Aborted)
                    .expect("event fired ivar filled twice");
                AbortResult::Ok
            }
        }
    }

    /// `abort`, discarding the answer.
    pub fn abort_if_possible(&self) {
        let _ = self.abort();
    }

    /// Moves a still-pending event to a new time. Once the fire job has
    /// been queued the event is committed and reschedule reports
    /// `TooLateToReschedule`; terminal states report their own result.
    pub fn reschedule_at(&self, at: Time) -> RescheduleResult {
        match self.inner.status.get() {
            Status::Happened => RescheduleResult::PreviouslyHappened,
            Status::Aborted => RescheduleResult::PreviouslyAborted,
            Status::Waiting => {
                let scheduler = sched::ctx();
                match self.inner.alarm.get() {
                    Some(alarm) if scheduler.alarm_is_pending(alarm) => {
                        scheduler.remove_alarm(alarm);
                        self.inner.alarm.set(None);
                        self.inner.at.set(at);
                        arm(&self.inner, at);
                        RescheduleResult::Ok
                    }
                    _ => RescheduleResult::TooLateToReschedule,
                }
            }
        }
    }

    pub fn reschedule_after(&self, span: Span) -> RescheduleResult {
        self.reschedule_at(sched::cycle_start_time() + span)
    }
}

/// Registers a wheel entry driving the event toward `target`. Targets
/// beyond the wheel horizon are clamped; the intermediate alarm re-arms
/// until the target comes into range.
fn arm(inner: &Rc<EventInner>, target: Time) {
    let scheduler = sched::ctx();
    let clamped = target.min(scheduler.wheel_horizon());

    let chained = inner.clone();
    let alarm = scheduler
        .add_alarm(
            clamped,
            sched::current_context(),
            Box::new(move || on_alarm(&chained)),
        )
        .expect("clamped alarm fell outside the wheel horizon");
    inner.alarm.set(Some(alarm));
}

fn on_alarm(inner: &Rc<EventInner>) {
    if inner.status.get() != Status::Waiting {
        return;
    }
    inner.alarm.set(None);

    let target = inner.at.get();
    if sched::cycle_start_time() >= target {
        inner.status.set(Status::Happened);
        inner
            .fired
            .fill(Fired::Happened)
            .expect("event fired ivar filled twice");
    } else {
        arm(inner, target);
    }
}

/// Determined once the scheduler has advanced to `at`.
pub fn at(at: Time) -> Deferred<()> {
    Event::at(at).fired().ignore()
}

/// Determined once `span` has elapsed from the current cycle snapshot.
pub fn after(span: Span) -> Deferred<()> {
    at(sched::cycle_start_time() + span)
}

/// Races `deferred` against a timer. When the value arrives first, even
/// within the same cycle the timer fires, the value wins and the timer
/// is aborted.
pub fn with_timeout<T>(span: Span, deferred: &Deferred<T>) -> Deferred<TimeoutResult<T>>
where
    T: Clone + 'static,
{
    let event = Event::after(span);
    let result: Ivar<TimeoutResult<T>> = Ivar::new();

    let won = result.clone();
    let timer = event.clone();
    deferred.upon(move |v| {
        if won.fill_if_empty(TimeoutResult::Result(v)) {
            timer.abort_if_possible();
        }
    });

    let expired = result.clone();
    let racer = deferred.clone();
    event.fired().upon(move |fired| {
        if let Fired::Happened = fired {
            match racer.peek() {
                Some(v) => {
                    expired.fill_if_empty(TimeoutResult::Result(v));
                }
                None => {
                    expired.fill_if_empty(TimeoutResult::Timeout);
                }
            }
        }
    });

    result.read()
}

/// Options shared by the repeating-schedule operations.
pub struct Repeat {
    /// First invocation time; defaults to right away (or the first
    /// future multiple for the interval-aligned variants).
    pub start: Option<Time>,
    /// Determining this deferred stops the loop.
    pub stop: Option<Deferred<()>>,
    /// Isolate every invocation: a failure is sent to the surrounding
    /// monitor and the loop keeps going. With `false` the first failure
    /// still reaches the monitor, then terminates the loop.
    pub continue_on_error: bool,
}

impl Default for Repeat {
    fn default() -> Self {
        Repeat {
            start: None,
            stop: None,
            continue_on_error: true,
        }
    }
}

enum Cadence {
    /// Next run is `interval` after the previous one finishes.
    Relative,
    /// Runs stick to `base + k * interval`, skipping multiples that
    /// passed while the scheduler (or the body) fell behind.
    Aligned { base: Time },
}

struct Loop {
    interval: Span,
    cadence: Cadence,
    stop: Option<Deferred<()>>,
    continue_on_error: bool,
    /// The monitor surrounding the loop's creation; failures of isolated
    /// invocations are re-raised here.
    monitor: Monitor,
    body: RefCell<Box<dyn FnMut() -> Deferred<()>>>,
}

impl Loop {
    fn stopped(&self) -> bool {
        self.stop.as_ref().map_or(false, |d| d.is_determined())
    }

    fn next_run(&self, now: Time) -> Time {
        match self.cadence {
            Cadence::Relative => now + self.interval,
            Cadence::Aligned { base } => next_multiple(base, self.interval, now),
        }
    }
}

/// The first `base + k * interval` strictly after `now`.
fn next_multiple(base: Time, interval: Span, now: Time) -> Time {
    if now < base {
        return base;
    }
    let k = (now - base).nanos() / interval.nanos() + 1;
    base + interval * k
}

fn start_loop(state: Rc<Loop>) {
    let first = match state.cadence {
        Cadence::Relative => None,
        Cadence::Aligned { base } => Some(base),
    };
    match first {
        Some(at) => {
            Event::run_at(at, move || invoke(state));
        }
        None => sched::spawn(move || invoke(state)),
    }
}

fn invoke(state: Rc<Loop>) {
    if state.stopped() {
        return;
    }

    let body = state.clone();
    let outcome = monitor::try_with(move || (*body.body.borrow_mut())());

    let chain = state;
    outcome.upon(move |result| {
        if let Err(fault) = result {
            monitor::send_error(&chain.monitor, fault);
            if !chain.continue_on_error {
                return;
            }
        }
        if chain.stopped() {
            return;
        }

        let at = chain.next_run(sched::cycle_start_time());
        let again = chain.clone();
        Event::run_at(at, move || invoke(again));
    });
}

fn spin_up<F>(interval: Span, repeat: Repeat, cadence: bool, body: F) -> Result<()>
where
    F: FnMut() -> Deferred<()> + 'static,
{
    if !interval.is_positive() {
        return Err(Error::InvalidSpan(interval));
    }

    let cadence = if cadence {
        let base = repeat
            .start
            .unwrap_or_else(|| sched::cycle_start_time() + interval);
        Cadence::Aligned { base }
    } else {
        Cadence::Relative
    };

    let state = Rc::new(Loop {
        interval,
        cadence,
        stop: repeat.stop,
        continue_on_error: repeat.continue_on_error,
        monitor: Monitor::current(),
        body: RefCell::new(Box::new(body)),
    });

    if let Some(start) = repeat.start {
        if let Cadence::Relative = state.cadence {
            let state = state.clone();
            Event::run_at(start, move || invoke(state));
            return Ok(());
        }
    }
    start_loop(state);
    Ok(())
}

/// Runs `f` now and then every `interval` after the previous invocation
/// returns.
pub fn every<F>(interval: Span, repeat: Repeat, mut f: F) -> Result<()>
where
    F: FnMut() + 'static,
{
    spin_up(interval, repeat, false, move || {
        f();
        ivar::unit()
    })
}

/// Like `every`, but waits for the deferred each invocation returns
/// before the interval starts counting.
pub fn every_deferred<F>(interval: Span, repeat: Repeat, f: F) -> Result<()>
where
    F: FnMut() -> Deferred<()> + 'static,
{
    spin_up(interval, repeat, false, f)
}

/// Runs `f` at `start + k * interval`. When the scheduler falls behind,
/// missed multiples are skipped rather than burst.
pub fn run_at_intervals<F>(interval: Span, repeat: Repeat, mut f: F) -> Result<()>
where
    F: FnMut() + 'static,
{
    spin_up(interval, repeat, true, move || {
        f();
        ivar::unit()
    })
}

/// Interval-aligned like `run_at_intervals`, waiting out the body's
/// deferred; multiples that pass while the body runs are skipped.
pub fn run_at_intervals_deferred<F>(interval: Span, repeat: Repeat, f: F) -> Result<()>
where
    F: FnMut() -> Deferred<()> + 'static,
{
    spin_up(interval, repeat, true, f)
}

/// A reader carrying one `()` per elapsed interval, starting at `start`
/// (default: one interval from now) until `stop`. A tick is dropped
/// rather than buffered when the consumer has not taken the previous one.
pub fn at_intervals(
    interval: Span,
    start: Option<Time>,
    stop: Option<Deferred<()>>,
) -> Result<pipe::Reader<()>> {
    if !interval.is_positive() {
        return Err(Error::InvalidSpan(interval));
    }

    let (writer, reader) = pipe::new(1);
    let base = start.unwrap_or_else(|| sched::cycle_start_time() + interval);

    if let Some(stop) = stop.as_ref() {
        let writer = writer.clone();
        stop.upon(move |_| writer.close());
    }

    struct Ticks {
        interval: Span,
        base: Time,
        writer: pipe::Writer<()>,
        stop: Option<Deferred<()>>,
    }

    fn tick(state: Rc<Ticks>) {
        if state.writer.is_closed() || state.stop.as_ref().map_or(false, |d| d.is_determined()) {
            state.writer.close();
            return;
        }

        if state.writer.len() == 0 {
            let _ = state.writer.write_without_pushback(());
        }

        let at = next_multiple(state.base, state.interval, sched::cycle_start_time());
        let again = state.clone();
        Event::run_at(at, move || tick(again));
    }

    let state = Rc::new(Ticks {
        interval,
        base,
        writer,
        stop,
    });
    Event::run_at(base, move || tick(state));

    Ok(reader)
}
