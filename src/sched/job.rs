//! Pooled job slots and the two-band FIFO queue.

use std::collections::VecDeque;

use super::context::{ExecutionContext, Priority};
use crate::utils::arena::{Arena, Handle};

/// A unit of work popped off the queue, ready to run. The backing slot
/// has already been recycled by the time a `Job` is handed out, so the
/// captured closure drops as soon as it has been consumed.
pub(crate) struct Job {
    pub context: ExecutionContext,
    pub run: Box<dyn FnOnce()>,
}

struct Slot {
    context: ExecutionContext,
    run: Option<Box<dyn FnOnce()>>,
}

/// Two FIFO bands over a shared pool of job slots. Slots are recycled
/// through the arena's free list, so steady-state enqueueing does not
/// allocate queue storage.
pub(crate) struct JobQueue {
    pool: Arena<Slot>,
    normal: VecDeque<Handle>,
    low: VecDeque<Handle>,
}

impl JobQueue {
    pub fn new() -> JobQueue {
        JobQueue {
            pool: Arena::with_capacity(64),
            normal: VecDeque::new(),
            low: VecDeque::new(),
        }
    }

    pub fn push(&mut self, context: ExecutionContext, run: Box<dyn FnOnce()>) {
        let priority = context.priority();
        let handle = self.pool.insert(Slot {
            context,
            run: Some(run),
        });
        self.band_mut(priority).push_back(handle);
    }

    pub fn pop(&mut self, priority: Priority) -> Option<Job> {
        let handle = self.band_mut(priority).pop_front()?;
        let slot = self
            .pool
            .remove(handle)
            .expect("queued job slot disappeared");
        Some(Job {
            context: slot.context,
            run: slot.run.expect("queued job slot had no work"),
        })
    }

    #[inline]
    pub fn len(&self, priority: Priority) -> usize {
        self.band(priority).len()
    }

    #[inline]
    pub fn total_len(&self) -> usize {
        self.normal.len() + self.low.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn check_invariants(&self) {
        assert_eq!(self.pool.len(), self.total_len());
        for handle in self.normal.iter().chain(self.low.iter()) {
            assert!(self.pool.contains(*handle), "queued handle went stale");
        }
    }

    #[inline]
    fn band(&self, priority: Priority) -> &VecDeque<Handle> {
        match priority {
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    #[inline]
    fn band_mut(&mut self, priority: Priority) -> &mut VecDeque<Handle> {
        match priority {
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}
