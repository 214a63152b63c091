//! An async condition variable.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::ivar::{Deferred, Ivar};

/// Broadcast signaling between tasks. `wait` observes the next `signal`
/// or `broadcast`; waiters registering after a broadcast wait for the
/// following one.
pub struct Condition<T: 'static> {
    waiters: Rc<RefCell<VecDeque<Ivar<T>>>>,
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        Condition {
            waiters: self.waiters.clone(),
        }
    }
}

impl<T> Default for Condition<T> {
    fn default() -> Self {
        Condition::new()
    }
}

impl<T> Condition<T> {
    pub fn new() -> Condition<T> {
        Condition {
            waiters: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    #[inline]
    pub fn num_waiting(&self) -> usize {
        self.waiters.borrow().len()
    }
}

impl<T: Clone> Condition<T> {
    /// Determined by the next `signal` or `broadcast`.
    pub fn wait(&self) -> Deferred<T> {
        let ivar = Ivar::new();
        self.waiters.borrow_mut().push_back(ivar.clone());
        ivar.read()
    }

    /// Wakes the longest-waiting waiter, if any; otherwise the value is
    /// dropped.
    pub fn signal(&self, value: T) {
        let waiter = self.waiters.borrow_mut().pop_front();
        if let Some(waiter) = waiter {
            waiter.fill(value).expect("condition waiter filled twice");
        }
    }

    /// Wakes every current waiter with a clone of `value`.
    pub fn broadcast(&self, value: T) {
        let drained = {
            let mut waiters = self.waiters.borrow_mut();
            waiters.drain(..).collect::<Vec<_>>()
        };
        for waiter in drained {
            waiter
                .fill(value.clone())
                .expect("condition waiter filled twice");
        }
    }
}
