//! Async functions driven by promises.
//!
//! [`async_fn`] wraps a Rust `async` body so that calling it returns a
//! [`Promise`]. The body is polled by the engine, never by an executor: each
//! time it suspends on [`await_value`], the awaited value is coerced into a
//! promise and the body is polled again from that promise's reaction,
//! carrying either the fulfillment value or the rejection reason.
//!
//! ```
//! use promise_engine::{async_fn, await_value, io, timer, PromiseState, Value};
//!
//! async fn nap(_args: Vec<Value>) -> Result<Value, Value> {
//!     await_value(io::sleep(0.01))?.await?;
//!     Ok(Value::from("rested"))
//! }
//!
//! let promise = async_fn(nap).call(vec![]);
//! assert_eq!(timer::run_until(&promise), PromiseState::Fulfilled);
//! assert_eq!(promise.result(), Value::from("rested"));
//! ```
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::task::noop_waker_ref;
use tracing::debug;

use crate::{Error, Handler, Promise, Reject, Resolve, Value};

type Body = Pin<Box<dyn Future<Output = Result<Value, Value>>>>;

/// Hand-off point between a suspended body and the task driving it.
#[derive(Default)]
struct Slot {
    awaited: RefCell<Option<Value>>,
    resumed: RefCell<Option<Result<Value, Value>>>,
    // Set when a second suspension arrives before the first was picked up.
    overlapped: Cell<bool>,
}

thread_local! {
    static ACTIVE: RefCell<Vec<Rc<Slot>>> = const { RefCell::new(Vec::new()) };
}

/// Marks a task as running for as long as it is alive.
struct Active;

impl Active {
    fn enter(slot: &Rc<Slot>) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(slot.clone()));
        Active
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.borrow_mut().pop());
    }
}

pub fn is_active() -> bool {
    ACTIVE.with(|active| !active.borrow().is_empty())
}

/// Suspends the running async function until `value` settles.
///
/// Outside an async function this is misuse and fails with
/// [`Error::AwaitOutsideTask`]. The returned future yields `Ok(value)` on
/// fulfillment and `Err(reason)` on rejection, so the body can handle a
/// rejection locally or propagate it with `?`.
pub fn await_value(value: impl Into<Value>) -> Result<Suspend, Error> {
    let slot = ACTIVE
        .with(|active| active.borrow().last().cloned())
        .ok_or(Error::AwaitOutsideTask)?;
    Ok(Suspend {
        awaited: Some(value.into()),
        slot,
    })
}

/// The future returned by [`await_value`].
pub struct Suspend {
    awaited: Option<Value>,
    slot: Rc<Slot>,
}

impl Future for Suspend {
    type Output = Result<Value, Value>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(value) = self.awaited.take() {
            let mut awaited = self.slot.awaited.borrow_mut();
            if awaited.is_some() {
                self.slot.overlapped.set(true);
            } else {
                *awaited = Some(value);
            }
            return Poll::Pending;
        }
        match self.slot.resumed.borrow_mut().take() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl fmt::Debug for Suspend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspend")
            .field("awaited", &self.awaited)
            .finish()
    }
}

struct Task {
    body: RefCell<Option<Body>>,
    slot: Rc<Slot>,
    resolve: Resolve,
    reject: Reject,
}

impl Task {
    fn resume(self: &Rc<Self>, resumption: Option<Result<Value, Value>>) {
        let Some(mut body) = self.body.borrow_mut().take() else {
            return;
        };
        *self.slot.resumed.borrow_mut() = resumption;
        let poll = {
            let _active = Active::enter(&self.slot);
            body.as_mut().poll(&mut Context::from_waker(noop_waker_ref()))
        };
        match poll {
            Poll::Ready(Ok(value)) => {
                debug!(%value, "async function returned");
                self.resolve.call(value);
            }
            Poll::Ready(Err(reason)) => {
                debug!(%reason, "async function failed");
                self.reject.call(reason);
            }
            Poll::Pending if self.slot.overlapped.take() => {
                self.slot.awaited.borrow_mut().take();
                debug!("async function awaited concurrently");
                self.reject.call(Error::ConcurrentAwait);
            }
            Poll::Pending => {
                let Some(awaited) = self.slot.awaited.borrow_mut().take() else {
                    self.reject.call(Error::ForeignAwait);
                    return;
                };
                *self.body.borrow_mut() = Some(body);
                let (fulfilled, rejected) = (self.clone(), self.clone());
                Promise::resolve(awaited).next(
                    Some(Handler::new(move |value| {
                        fulfilled.resume(Some(Ok(value)));
                        Ok(Value::Nil)
                    })),
                    Some(Handler::new(move |reason| {
                        rejected.resume(Some(Err(reason)));
                        Ok(Value::Nil)
                    })),
                );
            }
        }
    }
}

/// A function whose calls return promises, see [`async_fn`].
#[derive(Clone)]
pub struct AsyncFn {
    body: Rc<dyn Fn(Vec<Value>) -> Body>,
}

impl AsyncFn {
    /// Starts a new task for `args`. The body runs synchronously up to its
    /// first suspension point.
    pub fn call(&self, args: Vec<Value>) -> Promise {
        let (promise, resolve, reject) = Promise::with_resolvers();
        let task = Rc::new(Task {
            body: RefCell::new(Some((self.body)(args))),
            slot: Rc::default(),
            resolve,
            reject,
        });
        task.resume(None);
        promise
    }

    /// The function as a promise handler taking a single argument.
    pub fn into_handler(self) -> Handler {
        Handler::new(move |argument| Ok(Value::from(self.call(vec![argument]))))
    }
}

impl fmt::Debug for AsyncFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncFn {{ ... }}")
    }
}

pub fn async_fn<F, Fut>(f: F) -> AsyncFn
where
    F: Fn(Vec<Value>) -> Fut + 'static,
    Fut: Future<Output = Result<Value, Value>> + 'static,
{
    AsyncFn {
        body: Rc::new(move |args| Box::pin(f(args)) as Body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{timer, Invocation, PromiseState};

    async fn add(args: Vec<Value>) -> Result<Value, Value> {
        let mut total = 0.0;
        for arg in args {
            total += await_value(arg)?.await?.as_number().unwrap_or(0.0);
        }
        Ok(Value::from(total))
    }

    #[test]
    fn test_await_outside_task_is_usage_error() {
        assert!(!is_active());
        assert_eq!(await_value(1).unwrap_err(), Error::AwaitOutsideTask);
    }

    #[test]
    fn test_returns_promise_of_body_result() {
        let (pending, resolve, _) = Promise::with_resolvers();
        let sum = async_fn(add).call(vec![
            Value::from(1.0),
            Value::from(Promise::resolve(2.0)),
            Value::from(pending),
        ]);
        timer::run();
        assert_eq!(sum.state(), PromiseState::Pending);
        resolve.call(3.0);
        timer::run();
        assert_eq!(sum.inspect(), (Value::from(6.0), PromiseState::Fulfilled));
    }

    #[test]
    fn test_runs_synchronously_until_first_await() {
        let steps = Rc::new(Cell::new(0));
        let counter = steps.clone();
        let promise = async_fn(move |_| {
            let steps = counter.clone();
            async move {
                steps.set(1);
                await_value(Value::Nil)?.await?;
                steps.set(2);
                Ok::<_, Value>(Value::Nil)
            }
        })
        .call(vec![]);
        assert_eq!(steps.get(), 1);
        assert_eq!(promise.state(), PromiseState::Pending);
        timer::run();
        assert_eq!(steps.get(), 2);
        assert_eq!(promise.state(), PromiseState::Fulfilled);
    }

    #[test]
    fn test_rejection_is_raised_inside_body() {
        async fn guarded(_args: Vec<Value>) -> Result<Value, Value> {
            match await_value(Promise::reject("bad input"))?.await {
                Ok(_) => Ok(Value::from("unexpected")),
                Err(reason) => Ok(Value::from(format!("handled {reason}"))),
            }
        }
        let handled = async_fn(guarded).call(vec![]);
        let propagated = async_fn(add).call(vec![Value::from(Promise::reject("nan"))]);
        timer::run();
        assert_eq!(
            handled.inspect(),
            (Value::from("handled bad input"), PromiseState::Fulfilled)
        );
        assert_eq!(propagated.inspect(), (Value::from("nan"), PromiseState::Rejected));
    }

    #[test]
    fn test_body_error_before_await_rejects() {
        let promise = async_fn(|_| async { Err::<Value, _>(Value::from("early")) }).call(vec![]);
        assert_eq!(promise.inspect(), (Value::from("early"), PromiseState::Rejected));
    }

    #[test]
    fn test_invoke_inside_task_awaits() {
        async fn peek(args: Vec<Value>) -> Result<Value, Value> {
            let Some(Value::Promise(promise)) = args.first() else {
                return Err(Value::from("expected a promise"));
            };
            match promise.invoke() {
                Invocation::Suspended(suspend) => suspend.await,
                Invocation::Inspected(..) => Err(Value::from("inspected inside a task")),
            }
        }
        let (inner, resolve, _) = Promise::with_resolvers();
        let outer = async_fn(peek).call(vec![Value::from(inner)]);
        resolve.call("through invoke");
        timer::run();
        assert_eq!(
            outer.inspect(),
            (Value::from("through invoke"), PromiseState::Fulfilled)
        );
    }

    #[test]
    fn test_nested_async_functions() {
        async fn inner(args: Vec<Value>) -> Result<Value, Value> {
            let value = await_value(args.into_iter().next())?.await?;
            Ok(Value::from(format!("inner({value})")))
        }
        async fn outer(args: Vec<Value>) -> Result<Value, Value> {
            let first = await_value(async_fn(inner).call(args))?.await?;
            assert!(is_active());
            Ok(Value::from(format!("outer({first})")))
        }
        let promise = async_fn(outer).call(vec![Value::from("x")]);
        timer::run();
        assert!(!is_active());
        assert_eq!(
            promise.inspect(),
            (Value::from("outer(inner(x))"), PromiseState::Fulfilled)
        );
    }

    #[test]
    fn test_foreign_future_rejects() {
        let promise = async_fn(|_| async {
            futures::future::pending::<()>().await;
            Ok::<_, Value>(Value::Nil)
        })
        .call(vec![]);
        assert_eq!(promise.result().as_error(), Some(&Error::ForeignAwait));
    }

    #[test]
    fn test_joined_awaits_reject() {
        let second_ran = Rc::new(Cell::new(false));
        let flag = second_ran.clone();
        let promise = async_fn(move |_| {
            let flag = flag.clone();
            async move {
                let (first, second) = futures::join!(await_value(1)?, await_value(2)?);
                flag.set(true);
                first?;
                second
            }
        })
        .call(vec![]);
        timer::run();
        assert_eq!(promise.result().as_error(), Some(&Error::ConcurrentAwait));
        assert!(!second_ran.get());
    }

    #[test]
    fn test_as_handler() {
        let chained = Promise::resolve(4.0).next(Some(async_fn(add).into_handler()), None);
        timer::run();
        assert_eq!(chained.inspect(), (Value::from(4.0), PromiseState::Fulfilled));
    }
}
