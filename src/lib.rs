//! A single-threaded promise engine.
//!
//! Promises settle once, run their reactions through a microtask queue that
//! drains before any delayed callback fires, and can be combined with
//! [`Promise::all`], [`Promise::all_settled`], [`Promise::any`] and
//! [`Promise::race`]. [`async_fn`] lets ordinary `async` bodies be driven by
//! the engine, suspending at [`await_value`].
//!
//! Nothing runs on its own: the host drives the per-thread [`timer`] loop.
//!
//! # Examples
//!
//! ```
//! use promise_engine::{timer, Handler, Promise, PromiseState, Value};
//!
//! let doubled = Promise::resolve(21.0).next(
//!     Some(Handler::new(|value| Ok(Value::from(value.as_number().unwrap_or(0.0) * 2.0)))),
//!     None,
//! );
//! assert_eq!(doubled.state(), PromiseState::Pending);
//! timer::run();
//! assert_eq!(doubled.inspect(), (Value::from(42.0), PromiseState::Fulfilled));
//! ```
pub mod callable;
pub mod combinators;
mod error;
pub mod io;
pub mod microtask;
pub mod promise;
pub mod task;
pub mod timer;
pub mod value;

pub use callable::{is_callable, Callable, Handler};
pub use combinators::keyed;
pub use error::Error;
pub use promise::{is_promise, Invocation, Promise, PromiseState, Reject, Resolve, Thenable};
pub use task::{async_fn, await_value, AsyncFn, Suspend};
pub use value::{Key, Table, Value};
