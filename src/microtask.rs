//! The microtask queue.
//!
//! Continuations are queued FIFO and drained by a single zero-delay trigger
//! scheduled through [`crate::timer`]. The trigger is armed lazily on the
//! first enqueue and re-armed whenever work arrives after a drain. Anything
//! enqueued while draining runs in the same pass, so a chain of promise
//! reactions always finishes before the next delayed callback fires.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use tracing::trace;

use crate::timer;

type Microtask = Box<dyn FnOnce()>;

#[derive(Default)]
struct MicrotaskQueue {
    queue: VecDeque<Microtask>,
    armed: bool,
    // Bumped on every arming so a trigger left in a replaced scheduler
    // cannot disarm the current one.
    generation: u64,
}

impl MicrotaskQueue {
    fn arm(&mut self) -> Option<u64> {
        if self.armed {
            return None;
        }
        self.armed = true;
        self.generation += 1;
        Some(self.generation)
    }
}

thread_local! {
    static QUEUE: RefCell<MicrotaskQueue> = RefCell::new(MicrotaskQueue::default());
}

pub fn enqueue(task: impl FnOnce() + 'static) {
    let arm = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.queue.push_back(Box::new(task));
        queue.arm()
    });
    if let Some(generation) = arm {
        schedule_trigger(generation);
    }
}

fn schedule_trigger(generation: u64) {
    trace!(generation, "arming microtask trigger");
    timer::schedule_after(Duration::ZERO, move || trigger(generation));
}

fn trigger(generation: u64) {
    let ran = drain();
    QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        if queue.generation == generation {
            queue.armed = false;
        }
    });
    trace!(ran, generation, "microtask trigger finished");
}

/// Moves the trigger to the scheduler that is installed now. Called when
/// the scheduler is swapped.
pub(crate) fn rearm() {
    let arm = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.armed = false;
        if queue.queue.is_empty() {
            None
        } else {
            queue.arm()
        }
    });
    if let Some(generation) = arm {
        schedule_trigger(generation);
    }
}

/// Runs queued continuations until the queue is empty, returning how many ran.
pub fn drain() -> usize {
    let mut ran = 0;
    while let Some(task) = QUEUE.with(|queue| queue.borrow_mut().queue.pop_front()) {
        task();
        ran += 1;
    }
    ran
}

pub fn pending() -> usize {
    QUEUE.with(|queue| queue.borrow().queue.len())
}
