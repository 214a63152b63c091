//! An ordered buffered stream with flush-based back-pressure.
//!
//! Values travel writer-to-reader in insertion order. `write` hands back
//! a deferred that releases once the buffer is back within capacity, so
//! cooperative producers throttle themselves; `write_without_pushback`
//! opts out. With several concurrent readers each value goes to exactly
//! one of them, in the order the readers arrived.

pub mod errors;

pub use self::errors::{Error, Result};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::ivar::{Deferred, Ivar};

/// The synchronous read results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadNow<T> {
    Value(T),
    Eof,
    NothingAvailable,
}

/// The result of `read_exactly`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadExactly<T> {
    Exactly(Vec<T>),
    /// The pipe closed before the demand was met; what was buffered.
    Fewer(Vec<T>),
    Eof,
}

/// The result of a flush probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flushed {
    Complete,
    ReaderClosed,
}

enum PendingRead<T: 'static> {
    One(Ivar<Option<T>>),
    Exactly {
        demanded: usize,
        got: Vec<T>,
        result: Ivar<ReadExactly<T>>,
    },
    All {
        got: Vec<T>,
        result: Ivar<Vec<T>>,
    },
}

struct Flush {
    upto: u64,
    result: Ivar<Flushed>,
}

struct State<T: 'static> {
    buffer: VecDeque<T>,
    capacity: usize,
    closed: bool,
    read_closed: bool,
    pushback: Option<Ivar<()>>,
    readers: VecDeque<PendingRead<T>>,
    flushes: VecDeque<Flush>,
    num_written: u64,
    num_read: u64,
}

type StateRef<T> = Rc<RefCell<State<T>>>;

/// The producing end. Cloneable; concurrent writers interleave in call
/// order.
pub struct Writer<T: 'static> {
    state: StateRef<T>,
}

/// The consuming end. Cloneable; concurrent readers partition the values
/// in arrival order.
pub struct Reader<T: 'static> {
    state: StateRef<T>,
}

impl<T> Clone for Writer<T> {
    fn clone(&self) -> Self {
        Writer {
            state: self.state.clone(),
        }
    }
}

impl<T> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Reader {
            state: self.state.clone(),
        }
    }
}

/// Creates a pipe whose cooperative writers block (through the deferred
/// `write` returns) once more than `capacity` values are buffered.
pub fn new<T>(capacity: usize) -> (Writer<T>, Reader<T>) {
    assert!(capacity >= 1, "pipe capacity must be at least 1");
    with_capacity(capacity)
}

/// Creates a pipe that never pushes back.
pub fn unbounded<T>() -> (Writer<T>, Reader<T>) {
    with_capacity(usize::max_value())
}

fn with_capacity<T>(capacity: usize) -> (Writer<T>, Reader<T>) {
    let state = Rc::new(RefCell::new(State {
        buffer: VecDeque::new(),
        capacity,
        closed: false,
        read_closed: false,
        pushback: None,
        readers: VecDeque::new(),
        flushes: VecDeque::new(),
        num_written: 0,
        num_read: 0,
    }));
    (
        Writer {
            state: state.clone(),
        },
        Reader { state },
    )
}

impl<T: Clone> Writer<T> {
    /// Appends `value` and hands back a deferred that determines once the
    /// buffer is back within capacity (or the pipe closes). Fails with
    /// `Closed` once the pipe has been closed.
    pub fn write(&self, value: T) -> Result<Deferred<()>> {
        self.write_without_pushback(value)?;

        let mut state = self.state.borrow_mut();
        if state.buffer.len() <= state.capacity {
            Ok(Deferred::determined(()))
        } else {
            let ivar = state.pushback.get_or_insert_with(Ivar::new).clone();
            Ok(ivar.read())
        }
    }

    /// Appends `value` without registering for back-pressure.
    pub fn write_without_pushback(&self, value: T) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return Err(Error::Closed);
            }
            state.buffer.push_back(value);
            state.num_written += 1;
        }
        pump(&self.state);
        Ok(())
    }

    /// Closes the write end: subsequent writes fail, readers drain the
    /// buffer and then observe EOF.
    pub fn close(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        pump(&self.state);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.state.borrow().buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Determined once every value written so far has been handed to a
    /// reader, or with `ReaderClosed` when the read end gives up first.
    pub fn downstream_flushed(&self) -> Deferred<Flushed> {
        flushed(&self.state)
    }

    /// This pipe is its own upstream; see `downstream_flushed`.
    pub fn upstream_flushed(&self) -> Deferred<Flushed> {
        flushed(&self.state)
    }
}

impl<T: Clone> Reader<T> {
    /// The next value in producer order, or `None` once the pipe is
    /// closed and drained.
    pub fn read(&self) -> Deferred<Option<T>> {
        let ivar = Ivar::new();
        self.state
            .borrow_mut()
            .readers
            .push_back(PendingRead::One(ivar.clone()));
        pump(&self.state);
        ivar.read()
    }

    /// Pops synchronously when a value is buffered and no earlier reader
    /// is waiting.
    pub fn read_now(&self) -> ReadNow<T> {
        let popped = {
            let mut state = self.state.borrow_mut();
            if !state.readers.is_empty() {
                return ReadNow::NothingAvailable;
            }
            match state.buffer.pop_front() {
                Some(v) => {
                    state.num_read += 1;
                    Some(v)
                }
                None if state.closed => return ReadNow::Eof,
                None => return ReadNow::NothingAvailable,
            }
        };

        pump(&self.state);
        ReadNow::Value(popped.expect("read_now lost its value"))
    }

    /// Accumulates exactly `demanded` values; a close mid-demand yields
    /// `Fewer` with what arrived (or `Eof` when nothing did).
    pub fn read_exactly(&self, demanded: usize) -> Deferred<ReadExactly<T>> {
        let ivar = Ivar::new();
        if demanded == 0 {
            ivar.fill(ReadExactly::Exactly(Vec::new()))
                .expect("fresh ivar was full");
            return ivar.read();
        }

        self.state
            .borrow_mut()
            .readers
            .push_back(PendingRead::Exactly {
                demanded,
                got: Vec::new(),
                result: ivar.clone(),
            });
        pump(&self.state);
        ivar.read()
    }

    /// Drains the pipe until EOF, then determines with everything read.
    pub fn read_all(&self) -> Deferred<Vec<T>> {
        let ivar = Ivar::new();
        self.state.borrow_mut().readers.push_back(PendingRead::All {
            got: Vec::new(),
            result: ivar.clone(),
        });
        pump(&self.state);
        ivar.read()
    }

    /// Closes the read end: buffered values are dropped, writers are
    /// released and flushes resolve to `ReaderClosed`. The write end
    /// closes too, so later writes fail with `Closed`.
    pub fn close(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.read_closed {
                return;
            }
            state.read_closed = true;
            state.closed = true;
            state.buffer.clear();
        }
        pump(&self.state);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.state.borrow().buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn downstream_flushed(&self) -> Deferred<Flushed> {
        flushed(&self.state)
    }

    pub fn upstream_flushed(&self) -> Deferred<Flushed> {
        flushed(&self.state)
    }
}

fn flushed<T: Clone>(state: &StateRef<T>) -> Deferred<Flushed> {
    let mut state = state.borrow_mut();
    if state.read_closed {
        return Deferred::determined(Flushed::ReaderClosed);
    }
    if state.buffer.is_empty() {
        return Deferred::determined(Flushed::Complete);
    }

    let ivar = Ivar::new();
    let upto = state.num_written;
    state.flushes.push_back(Flush {
        upto,
        result: ivar.clone(),
    });
    ivar.read()
}

/// Settles everything that can settle: waiting readers against the
/// buffer (and EOF), the shared pushback ivar, and flush probes. Filling
/// an ivar only enqueues handler jobs, so this never re-enters the pipe.
fn pump<T: Clone>(state_ref: &StateRef<T>) {
    let mut state = state_ref.borrow_mut();

    loop {
        if state.readers.is_empty() {
            break;
        }

        if !state.buffer.is_empty() {
            let value = state.buffer.pop_front().expect("checked non-empty");
            state.num_read += 1;

            let settled = {
                let reader = state.readers.front_mut().expect("checked non-empty");
                match reader {
                    PendingRead::One(ivar) => {
                        Some(PendingOutcome::One(ivar.clone(), Some(value)))
                    }
                    PendingRead::Exactly {
                        demanded,
                        got,
                        result,
                    } => {
                        got.push(value);
                        if got.len() == *demanded {
                            let got = ::std::mem::replace(got, Vec::new());
                            Some(PendingOutcome::Exactly(
                                result.clone(),
                                ReadExactly::Exactly(got),
                            ))
                        } else {
                            None
                        }
                    }
                    PendingRead::All { got, .. } => {
                        got.push(value);
                        None
                    }
                }
            };

            if let Some(outcome) = settled {
                state.readers.pop_front();
                outcome.deliver();
            }
        } else if state.closed {
            let reader = state.readers.pop_front().expect("checked non-empty");
            match reader {
                PendingRead::One(ivar) => {
                    ivar.fill(None).expect("pipe read ivar filled twice");
                }
                PendingRead::Exactly { got, result, .. } => {
                    let outcome = if got.is_empty() {
                        ReadExactly::Eof
                    } else {
                        ReadExactly::Fewer(got)
                    };
                    result.fill(outcome).expect("pipe read ivar filled twice");
                }
                PendingRead::All { got, result } => {
                    result.fill(got).expect("pipe read ivar filled twice");
                }
            }
        } else {
            break;
        }
    }

    if state.buffer.len() <= state.capacity || state.closed {
        if let Some(ivar) = state.pushback.take() {
            ivar.fill(()).expect("pipe pushback ivar filled twice");
        }
    }

    loop {
        let outcome = match state.flushes.front() {
            Some(_) if state.read_closed => Flushed::ReaderClosed,
            Some(flush) if state.num_read >= flush.upto => Flushed::Complete,
            _ => break,
        };
        let flush = state.flushes.pop_front().expect("checked non-empty");
        flush
            .result
            .fill(outcome)
            .expect("pipe flush ivar filled twice");
    }
}

enum PendingOutcome<T: 'static> {
    One(Ivar<Option<T>>, Option<T>),
    Exactly(Ivar<ReadExactly<T>>, ReadExactly<T>),
}

impl<T: Clone> PendingOutcome<T> {
    fn deliver(self) {
        match self {
            PendingOutcome::One(ivar, value) => {
                ivar.fill(value).expect("pipe read ivar filled twice");
            }
            PendingOutcome::Exactly(ivar, value) => {
                ivar.fill(value).expect("pipe read ivar filled twice");
            }
        }
    }
}
