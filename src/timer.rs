//! The deferred-execution service the engine is driven by.
//!
//! Everything the engine defers eventually goes through
//! [`schedule_after`]. By default callbacks land in a per-thread
//! [`TimerLoop`] which the host drives with [`run`] or [`run_until`]; a
//! different [`Scheduler`] can be swapped in with [`install`].
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::{microtask, Promise, PromiseState};

/// Invokes a callback once, no earlier than `delay` from now.
///
/// A delay too large to represent as an instant is never due; the callback
/// may be dropped without running.
pub trait Scheduler {
    fn schedule_after(&self, delay: Duration, callback: Box<dyn FnOnce()>);
}

struct Timer {
    due: Instant,
    id: u64,
    callback: Box<dyn FnOnce()>,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed so the max-heap pops the earliest timer, FIFO among equals.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.id).cmp(&(self.due, self.id))
    }
}

/// A single-threaded timer queue that sleeps until the next callback is due.
#[derive(Default)]
pub struct TimerLoop {
    timers: RefCell<BinaryHeap<Timer>>,
    next_id: Cell<u64>,
}

impl TimerLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.timers.borrow().is_empty()
    }

    /// Fires the earliest timer, sleeping until it is due. Returns `false`
    /// when nothing was scheduled.
    pub fn run_once(&self) -> bool {
        let Some(timer) = self.timers.borrow_mut().pop() else {
            return false;
        };
        let now = Instant::now();
        if timer.due > now {
            std::thread::sleep(timer.due - now);
        }
        trace!(timer = timer.id, "firing timer");
        (timer.callback)();
        true
    }

    /// Fires timers until none are left.
    pub fn run(&self) {
        while self.run_once() {}
    }
}

impl Scheduler for TimerLoop {
    fn schedule_after(&self, delay: Duration, callback: Box<dyn FnOnce()>) {
        let Some(due) = Instant::now().checked_add(delay) else {
            trace!(?delay, "timer is never due, dropping it");
            return;
        };
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.timers.borrow_mut().push(Timer { due, id, callback });
    }
}

thread_local! {
    static DEFAULT_LOOP: Rc<TimerLoop> = Rc::new(TimerLoop::new());
    static INSTALLED: RefCell<Option<Rc<dyn Scheduler>>> = const { RefCell::new(None) };
}

/// Replaces this thread's scheduler, returning the previously installed one.
pub fn install(scheduler: Rc<dyn Scheduler>) -> Option<Rc<dyn Scheduler>> {
    let previous = INSTALLED.with(|installed| installed.borrow_mut().replace(scheduler));
    microtask::rearm();
    previous
}

/// Goes back to the default [`TimerLoop`].
pub fn uninstall() -> Option<Rc<dyn Scheduler>> {
    let previous = INSTALLED.with(|installed| installed.borrow_mut().take());
    microtask::rearm();
    previous
}

pub fn schedule_after(delay: Duration, callback: impl FnOnce() + 'static) {
    let installed = INSTALLED.with(|installed| installed.borrow().clone());
    match installed {
        Some(scheduler) => scheduler.schedule_after(delay, Box::new(callback)),
        None => default_loop().schedule_after(delay, Box::new(callback)),
    }
}

/// This thread's default timer loop.
pub fn default_loop() -> Rc<TimerLoop> {
    DEFAULT_LOOP.with(Rc::clone)
}

/// Drives the default loop until no timers are left.
pub fn run() {
    default_loop().run();
}

/// Drives the default loop until `promise` settles or no timers are left,
/// returning the promise's state at that point.
pub fn run_until(promise: &Promise) -> PromiseState {
    let timers = default_loop();
    while promise.state() == PromiseState::Pending && timers.run_once() {}
    promise.state()
}
