//! The promise state machine.
//!
//! A [`Promise`] settles exactly once. Reactions registered with
//! [`Promise::next`] never run synchronously: once the promise is settled
//! each one is handed to the microtask queue, in registration order.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::task::{self, Suspend};
use crate::{microtask, Error, Handler, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// A foreign promise-like object. Resolving a promise with a thenable adopts
/// its eventual outcome through `then`; an `Err` from `then` rejects.
pub trait Thenable {
    fn then(&self, on_fulfilled: Handler, on_rejected: Handler) -> Result<(), Value>;
}

struct Reaction {
    on_fulfilled: Option<Handler>,
    on_rejected: Option<Handler>,
    resolve: Resolve,
    reject: Reject,
}

impl Reaction {
    fn run(self, state: PromiseState, result: Value) {
        let (handler, rejected) = match state {
            PromiseState::Rejected => (self.on_rejected, true),
            _ => (self.on_fulfilled, false),
        };
        match handler {
            Some(handler) => match handler.call(result) {
                Ok(value) => self.resolve.call(value),
                Err(reason) => self.reject.call(reason),
            },
            None if rejected => self.reject.call(result),
            None => self.resolve.call(result),
        }
    }
}

struct Inner {
    state: PromiseState,
    result: Value,
    reactions: VecDeque<Reaction>,
}

/// A deferred value.
///
/// Cloning a `Promise` clones the handle; both handles refer to the same
/// promise.
///
/// # Examples
///
/// ```
/// use promise_engine::{timer, Promise, PromiseState, Value};
///
/// let (promise, resolve, _reject) = Promise::with_resolvers();
/// assert_eq!(promise.state(), PromiseState::Pending);
/// resolve.call(Value::from("🍓"));
/// timer::run();
/// assert_eq!(promise.inspect(), (Value::from("🍓"), PromiseState::Fulfilled));
/// ```
#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<Inner>>,
}

/// The resolve function handed to an executor.
#[derive(Clone)]
pub struct Resolve {
    promise: Promise,
}

/// The reject function handed to an executor.
#[derive(Clone)]
pub struct Reject {
    promise: Promise,
}

impl Resolve {
    pub fn call(&self, value: impl Into<Value>) {
        self.promise.resolve_with(value.into());
    }

    pub fn into_handler(self) -> Handler {
        Handler::new(move |value| {
            self.call(value);
            Ok(Value::Nil)
        })
    }
}

impl Reject {
    pub fn call(&self, reason: impl Into<Value>) {
        self.promise.reject_with(reason.into());
    }

    pub fn into_handler(self) -> Handler {
        Handler::new(move |reason| {
            self.call(reason);
            Ok(Value::Nil)
        })
    }
}

/// What calling a promise directly produced, see [`Promise::invoke`].
#[derive(Debug)]
pub enum Invocation {
    Inspected(Value, PromiseState),
    Suspended(Suspend),
}

impl Promise {
    fn pending() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: PromiseState::Pending,
                result: Value::Nil,
                reactions: VecDeque::new(),
            })),
        }
    }

    /// Runs `executor` synchronously with this promise's resolve and reject
    /// functions. An `Err` returned by the executor rejects the promise.
    pub fn new<F>(executor: F) -> Promise
    where
        F: FnOnce(Resolve, Reject) -> Result<(), Value>,
    {
        let (promise, resolve, reject) = Promise::with_resolvers();
        if let Err(reason) = executor(resolve, reject.clone()) {
            debug!(%reason, "executor failed");
            reject.call(reason);
        }
        promise
    }

    /// A pending promise together with its own settle functions.
    pub fn with_resolvers() -> (Promise, Resolve, Reject) {
        let promise = Promise::pending();
        let resolve = Resolve {
            promise: promise.clone(),
        };
        let reject = Reject {
            promise: promise.clone(),
        };
        (promise, resolve, reject)
    }

    /// Wraps `value` in a promise; a promise is returned unchanged.
    pub fn resolve(value: impl Into<Value>) -> Promise {
        match value.into() {
            Value::Promise(promise) => promise,
            value => {
                let (promise, resolve, _) = Promise::with_resolvers();
                resolve.call(value);
                promise
            }
        }
    }

    /// A promise rejected with `reason`; a promise is returned unchanged.
    pub fn reject(reason: impl Into<Value>) -> Promise {
        match reason.into() {
            Value::Promise(promise) => promise,
            reason => {
                let (promise, _, reject) = Promise::with_resolvers();
                reject.call(reason);
                promise
            }
        }
    }

    pub fn state(&self) -> PromiseState {
        self.inner.borrow().state
    }

    /// The fulfillment value or rejection reason, `Nil` while pending.
    pub fn result(&self) -> Value {
        self.inner.borrow().result.clone()
    }

    pub fn inspect(&self) -> (Value, PromiseState) {
        let inner = self.inner.borrow();
        (inner.result.clone(), inner.state)
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Calls the promise directly. Outside an async function this inspects
    /// it; inside one it suspends on it like [`task::await_value`].
    pub fn invoke(&self) -> Invocation {
        match task::await_value(self.clone()) {
            Ok(suspend) => Invocation::Suspended(suspend),
            Err(_) => {
                let (result, state) = self.inspect();
                Invocation::Inspected(result, state)
            }
        }
    }

    /// Registers handlers and returns the derived promise they settle.
    ///
    /// A missing handler passes the settlement through unchanged.
    pub fn next(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Promise {
        let (derived, resolve, reject) = Promise::with_resolvers();
        self.inner.borrow_mut().reactions.push_back(Reaction {
            on_fulfilled,
            on_rejected,
            resolve,
            reject,
        });
        self.execute();
        derived
    }

    pub fn catch(&self, on_rejected: Option<Handler>) -> Promise {
        self.next(None, on_rejected)
    }

    /// Runs `on_finally` once whichever way this promise settles, passing the
    /// settlement through. An error from `on_finally` replaces it with a
    /// rejection.
    pub fn finally(&self, on_finally: Option<Handler>) -> Promise {
        let cleanup = on_finally.clone();
        let on_fulfilled = Handler::new(move |value| {
            if let Some(cleanup) = &cleanup {
                cleanup.call(Value::Nil)?;
            }
            Ok(value)
        });
        let on_rejected = Handler::new(move |reason| {
            if let Some(cleanup) = &on_finally {
                cleanup.call(Value::Nil)?;
            }
            Err(reason)
        });
        self.next(Some(on_fulfilled), Some(on_rejected))
    }

    fn resolve_with(&self, value: Value) {
        if self.state() != PromiseState::Pending {
            return;
        }
        match value {
            Value::Promise(other) if other.ptr_eq(self) => {
                debug!("promise resolved with itself");
                self.reject_with(Error::Cycle.into());
            }
            Value::Promise(other) => {
                trace!("adopting promise");
                let (resolve, reject) = self.settle_functions();
                microtask::enqueue(move || {
                    other.next(Some(resolve.into_handler()), Some(reject.into_handler()));
                });
            }
            Value::Thenable(thenable) => {
                trace!("adopting thenable");
                let (resolve, reject) = self.settle_functions();
                microtask::enqueue(move || {
                    let fallback = reject.clone();
                    if let Err(reason) = thenable.then(resolve.into_handler(), reject.into_handler()) {
                        fallback.call(reason);
                    }
                });
            }
            value => self.settle(PromiseState::Fulfilled, value),
        }
    }

    fn reject_with(&self, reason: Value) {
        if self.state() == PromiseState::Pending {
            self.settle(PromiseState::Rejected, reason);
        }
    }

    fn settle_functions(&self) -> (Resolve, Reject) {
        (
            Resolve {
                promise: self.clone(),
            },
            Reject {
                promise: self.clone(),
            },
        )
    }

    fn settle(&self, state: PromiseState, result: Value) {
        let reactions = {
            let mut inner = self.inner.borrow_mut();
            inner.state = state;
            inner.result = result;
            inner.reactions.len()
        };
        trace!(?state, reactions, "promise settled");
        if state == PromiseState::Rejected && reactions == 0 {
            debug!("rejected promise has no reactions yet");
        }
        self.execute();
    }

    /// Hands every queued reaction to the microtask queue. The queue length
    /// is re-read each round since draining may append to it.
    fn execute(&self) {
        loop {
            let (reaction, state, result) = {
                let mut inner = self.inner.borrow_mut();
                if inner.state == PromiseState::Pending {
                    return;
                }
                match inner.reactions.pop_front() {
                    Some(reaction) => (reaction, inner.state, inner.result.clone()),
                    None => return,
                }
            };
            microtask::enqueue(move || reaction.run(state, result));
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Promise")
                .field("state", &inner.state)
                .field("result", &inner.result)
                .finish(),
            Err(_) => f.write_str("Promise { <borrowed> }"),
        }
    }
}

/// Identity check against the engine's own promise type.
pub fn is_promise(value: &Value) -> bool {
    matches!(value, Value::Promise(_))
}
